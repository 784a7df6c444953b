use crate::feed::models::FeedEntry;
use quick_xml::{Reader, events::Event};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed feed at byte {position}: {message}")]
    Xml { position: u64, message: String },
    #[error("feed ended inside <{0}>")]
    Unclosed(String),
    #[error("feed has no root element")]
    NoRoot,
}

const ENTRY_ELEMENT: &str = "property";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    Reference,
    Address1,
    Address2,
    Address3,
    Town,
    Region,
    Postcode,
    Latitude,
    Longitude,
    ForSale,
    ToLet,
    FreeholdPrice,
    AskingPrice,
    FloorAreaMin,
    VirtualTourUrl,
    Tenure,
    Status,
    Details,
    LocationDescription,
    LegalInformation,
    FinancialInformation,
    RateableValue,
    AccommodationDimensions,
    BrochureUrl,
}

impl Scalar {
    fn from_element(name: &str) -> Option<Self> {
        Some(match name {
            "property_ref" => Self::Reference,
            "address1" => Self::Address1,
            "address2" => Self::Address2,
            "address3" => Self::Address3,
            "town" => Self::Town,
            "region" => Self::Region,
            "postcode" => Self::Postcode,
            "latitude" => Self::Latitude,
            "longitude" => Self::Longitude,
            "for_sale" => Self::ForSale,
            "to_let" => Self::ToLet,
            "Freehold_price" => Self::FreeholdPrice,
            "asking_price" => Self::AskingPrice,
            "floor_area_min" => Self::FloorAreaMin,
            "virtual_tour_url" => Self::VirtualTourUrl,
            "tenure" => Self::Tenure,
            "property_status" => Self::Status,
            "details" => Self::Details,
            "brochurefield6" => Self::LocationDescription,
            "brochurefield2" => Self::LegalInformation,
            "brochurefield19" => Self::FinancialInformation,
            "brochurefield3" => Self::RateableValue,
            "brochurefield17" => Self::AccommodationDimensions,
            "brochure_url" => Self::BrochureUrl,
            _ => return None,
        })
    }

    fn slot(self, entry: &mut FeedEntry) -> &mut String {
        match self {
            Self::Reference => &mut entry.reference,
            Self::Address1 => &mut entry.address1,
            Self::Address2 => &mut entry.address2,
            Self::Address3 => &mut entry.address3,
            Self::Town => &mut entry.town,
            Self::Region => &mut entry.region,
            Self::Postcode => &mut entry.postcode,
            Self::Latitude => &mut entry.latitude,
            Self::Longitude => &mut entry.longitude,
            Self::ForSale => &mut entry.for_sale,
            Self::ToLet => &mut entry.to_let,
            Self::FreeholdPrice => &mut entry.freehold_price,
            Self::AskingPrice => &mut entry.asking_price,
            Self::FloorAreaMin => &mut entry.floor_area_min,
            Self::VirtualTourUrl => &mut entry.virtual_tour_url,
            Self::Tenure => &mut entry.tenure,
            Self::Status => &mut entry.status,
            Self::Details => &mut entry.details,
            Self::LocationDescription => &mut entry.location_description,
            Self::LegalInformation => &mut entry.legal_information,
            Self::FinancialInformation => &mut entry.financial_information,
            Self::RateableValue => &mut entry.rateable_value,
            Self::AccommodationDimensions => &mut entry.accommodation_dimensions,
            Self::BrochureUrl => &mut entry.brochure_url,
        }
    }
}

/// Container element and item element of the repeated feed fields.
fn list_slot<'a>(
    container: &str,
    item: &str,
    entry: &'a mut FeedEntry,
) -> Option<&'a mut Vec<String>> {
    match (container, item) {
        ("localities", "locality_name") => Some(&mut entry.localities),
        ("property_types", "type_description") => Some(&mut entry.type_codes),
        ("images", "image_src") => Some(&mut entry.images),
        ("floorplans", "floorplan_src") => Some(&mut entry.floor_plans),
        _ => None,
    }
}

struct EntryBuilder {
    entry: FeedEntry,
    seen: Vec<Scalar>,
}

impl EntryBuilder {
    fn new() -> Self {
        Self {
            entry: FeedEntry::default(),
            seen: Vec::new(),
        }
    }

    fn close_element(&mut self, path: &[String], text: String) {
        match path {
            [field] => {
                let Some(scalar) = Scalar::from_element(field) else {
                    return;
                };
                // Repeated scalar elements keep the first value.
                if self.seen.contains(&scalar) {
                    return;
                }
                self.seen.push(scalar);
                *scalar.slot(&mut self.entry) = text;
            }
            [container, item] => {
                if let Some(list) = list_slot(container, item, &mut self.entry) {
                    list.push(text);
                }
            }
            _ => {}
        }
    }
}

/// Parses the complete feed document. The whole payload is validated before
/// any entry is returned, so a malformed feed never yields partial results.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedEntry>, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut saw_root = false;
    let mut current: Option<EntryBuilder> = None;
    // One buffer per open element below <property>; only direct text counts.
    let mut texts: Vec<String> = Vec::new();
    let mut entries = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| ParseError::Xml {
                position: reader.error_position() as u64,
                message: err.to_string(),
            })?;
        match event {
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                saw_root = true;
                stack.push(name);
                if stack.len() == 2 && stack[1] == ENTRY_ELEMENT {
                    current = Some(EntryBuilder::new());
                    texts.clear();
                } else if current.is_some() && stack.len() > 2 {
                    texts.push(String::new());
                }
            }
            Event::Empty(empty) => {
                let name = String::from_utf8_lossy(empty.local_name().as_ref()).into_owned();
                saw_root = true;
                stack.push(name);
                if stack.len() == 2 && stack[1] == ENTRY_ELEMENT {
                    entries.push(FeedEntry::default());
                } else if let Some(builder) = current.as_mut()
                    && stack.len() > 2
                {
                    builder.close_element(&stack[2..], String::new());
                }
                stack.pop();
            }
            Event::Text(raw) => {
                if current.is_some()
                    && let Some(open) = texts.last_mut()
                {
                    let value = raw.unescape().map_err(|err| ParseError::Xml {
                        position: reader.buffer_position() as u64,
                        message: err.to_string(),
                    })?;
                    open.push_str(&value);
                }
            }
            Event::CData(raw) => {
                if current.is_some()
                    && let Some(open) = texts.last_mut()
                {
                    let value = reader
                        .decoder()
                        .decode(&raw)
                        .map_err(|err| ParseError::Xml {
                            position: reader.buffer_position() as u64,
                            message: err.to_string(),
                        })?;
                    open.push_str(&value);
                }
            }
            Event::End(_) => {
                if stack.len() == 2 && stack[1] == ENTRY_ELEMENT {
                    if let Some(builder) = current.take() {
                        entries.push(builder.entry);
                    }
                } else if let Some(builder) = current.as_mut()
                    && stack.len() > 2
                {
                    let value = texts.pop().unwrap_or_default();
                    builder.close_element(&stack[2..], value);
                }
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.pop() {
        return Err(ParseError::Unclosed(open));
    }
    if !saw_root {
        return Err(ParseError::NoRoot);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<properties>
  <property>
    <property_ref>CP-1001</property_ref>
    <address1>Unit 4</address1>
    <address2>Harbour Road</address2>
    <address3></address3>
    <town>Redruth</town>
    <region>Cornwall</region>
    <postcode>TR15 1AA</postcode>
    <latitude>50.23</latitude>
    <longitude>-5.22</longitude>
    <for_sale>Y</for_sale>
    <to_let>N</to_let>
    <Freehold_price>250000</Freehold_price>
    <asking_price>0</asking_price>
    <floor_area_min>100</floor_area_min>
    <details><![CDATA[Warehouse with <b>yard</b>]]></details>
    <brochurefield3>Rates &amp; charges</brochurefield3>
    <brochure_url>https://media.example.com/docs/cp-1001.pdf</brochure_url>
    <property_types>
      <type_description>A1</type_description>
      <type_description>Warehouse</type_description>
    </property_types>
    <localities>
      <locality_name>Pool</locality_name>
    </localities>
    <images>
      <image_src>https://media.example.com/img/front.jpg</image_src>
      <image_src>https://media.example.com/img/rear.jpg</image_src>
    </images>
    <floorplans>
      <floorplan_src></floorplan_src>
      <floorplan_src>https://media.example.com/plans/ground.png</floorplan_src>
    </floorplans>
  </property>
  <property>
    <property_ref>CP-1002</property_ref>
    <to_let>Y</to_let>
    <images/>
  </property>
</properties>"#;

    #[test]
    fn parses_entries_in_order() {
        let entries = parse_feed(SAMPLE.as_bytes()).expect("parse");
        assert_eq!(entries.len(), 2);
        let first = &entries[0];
        assert_eq!(first.reference, "CP-1001");
        assert_eq!(first.town, "Redruth");
        assert_eq!(first.region, "Cornwall");
        assert!(first.is_for_sale());
        assert!(!first.is_to_let());
        assert_eq!(first.type_codes, vec!["A1", "Warehouse"]);
        assert_eq!(first.localities, vec!["Pool"]);
        assert_eq!(first.images.len(), 2);
        assert_eq!(
            first.featured_image(),
            Some("https://media.example.com/img/front.jpg")
        );
        assert_eq!(first.floor_plans.len(), 2);
        assert_eq!(first.floor_plan_urls().len(), 1);
        assert_eq!(entries[1].reference, "CP-1002");
        assert!(entries[1].images.is_empty());
    }

    #[test]
    fn decodes_cdata_and_entities() {
        let entries = parse_feed(SAMPLE.as_bytes()).expect("parse");
        assert_eq!(entries[0].details, "Warehouse with <b>yard</b>");
        assert_eq!(entries[0].rateable_value, "Rates & charges");
    }

    #[test]
    fn honours_declared_latin1_encoding() {
        let xml = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>\
<properties><property><property_ref>L1</property_ref>\
<asking_price>\xA3100</asking_price>\
<details><![CDATA[Rent \xA3100 pa]]></details>\
</property></properties>";
        let entries = parse_feed(xml).expect("parse");
        assert_eq!(entries[0].asking_price, "\u{a3}100");
        assert_eq!(entries[0].details, "Rent \u{a3}100 pa");
    }

    #[test]
    fn nested_markup_keeps_surrounding_text() {
        let xml = b"<properties><property><details>Line <b>x</b> more</details></property></properties>";
        let entries = parse_feed(xml).expect("parse");
        assert_eq!(entries[0].details, "Line  more");
    }

    #[test]
    fn empty_feed_has_no_entries() {
        let entries = parse_feed(b"<properties></properties>").expect("parse");
        assert!(entries.is_empty());
        let entries = parse_feed(b"<properties/>").expect("parse");
        assert!(entries.is_empty());
    }

    #[test]
    fn mismatched_tags_are_rejected() {
        let err = parse_feed(b"<properties><property><town>X</region></property></properties>")
            .expect_err("malformed");
        assert!(matches!(err, ParseError::Xml { .. }));
    }

    #[test]
    fn truncated_feed_is_rejected() {
        let err = parse_feed(b"<properties><property><property_ref>A</property_ref>")
            .expect_err("truncated");
        assert!(matches!(
            err,
            ParseError::Unclosed(_) | ParseError::Xml { .. }
        ));
    }

    #[test]
    fn blank_payload_is_rejected() {
        assert!(matches!(parse_feed(b"   "), Err(ParseError::NoRoot)));
    }

    #[test]
    fn unknown_elements_are_ignored() {
        let xml = b"<feed><property><property_ref>R1</property_ref><agent><name>X</name></agent></property></feed>";
        let entries = parse_feed(xml).expect("parse");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reference, "R1");
    }
}

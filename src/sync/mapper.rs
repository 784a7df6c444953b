use crate::catalog::{PropertyFields, TitleUpdate};
use crate::feed::FeedEntry;
use std::borrow::Cow;

const SQ_FT_PER_SQ_M: f64 = 10.7639;

const TYPE_GROUPS: &[(&str, &str)] = &[
    ("A1", "Retail & Leisure"),
    ("A2", "Retail & Leisure"),
    ("A3", "Retail & Leisure"),
    ("Warehouse", "Warehouse / Industrial"),
    ("Industrial", "Warehouse / Industrial"),
];

/// Raw codes that are only ever shown through their group label.
const HIDDEN_TYPE_CODES: &[&str] = &["Warehouse", "Industrial"];

#[derive(Debug, Clone, PartialEq)]
pub struct MappedListing {
    pub fields: PropertyFields,
    pub title: String,
    pub slug: String,
    pub permalink: String,
}

impl MappedListing {
    pub fn title_update(&self) -> TitleUpdate {
        TitleUpdate {
            title: self.title.clone(),
            slug: self.slug.clone(),
            permalink: self.permalink.clone(),
        }
    }
}

pub fn map_entry(entry: &FeedEntry, brand: &str) -> MappedListing {
    let slug = sanitize_title(&entry.reference);
    let sale = entry.is_for_sale();
    let rent = entry.is_to_let();

    let fields = PropertyFields {
        reference: slug.clone(),
        address: entry.address1.clone(),
        address2: entry.address2.clone(),
        address3: entry.address3.clone(),
        town: entry.town.clone(),
        county: entry.region.clone(),
        post_code: entry.postcode.clone(),
        latitude: entry.latitude.clone(),
        longitude: entry.longitude.clone(),
        localities: entry.localities.clone(),
        types: group_types(&entry.type_codes),
        price: select_price(entry),
        floor_area: entry.floor_area_min.clone(),
        floor_area_sq_ft: square_feet(&entry.floor_area_min),
        virtual_tour_url: entry.virtual_tour_url.clone(),
        tenure: entry.tenure.clone(),
        sale,
        rent,
        status: entry.status.clone(),
        description: entry.details.clone(),
        location_description: entry.location_description.clone(),
        legal_information: entry.legal_information.clone(),
        financial_information: entry.financial_information.clone(),
        rateable_value: entry.rateable_value.clone(),
        accommodation_dimensions: entry.accommodation_dimensions.clone(),
        feed_provided: true,
    };

    let title = build_title(&fields, brand);
    let permalink = build_permalink(sale, &fields.town, &slug);
    MappedListing {
        fields,
        title,
        slug,
        permalink,
    }
}

/// To-let wins when both flags are set.
pub fn select_price(entry: &FeedEntry) -> String {
    if entry.is_to_let() {
        entry.asking_price.clone()
    } else if entry.is_for_sale() {
        entry.freehold_price.clone()
    } else {
        String::new()
    }
}

pub fn square_feet(square_meters: &str) -> i64 {
    (leading_number(square_meters) * SQ_FT_PER_SQ_M).trunc() as i64
}

pub fn group_types(codes: &[String]) -> Vec<String> {
    let mut expanded: Vec<&str> = Vec::with_capacity(codes.len() * 2);
    for code in codes {
        expanded.push(code.as_str());
        if let Some((_, group)) = TYPE_GROUPS.iter().find(|(raw, _)| *raw == code.as_str()) {
            expanded.push(*group);
        }
    }

    let mut types: Vec<String> = Vec::with_capacity(expanded.len());
    for value in expanded {
        if HIDDEN_TYPE_CODES.contains(&value) || types.iter().any(|seen| seen == value) {
            continue;
        }
        types.push(value.to_string());
    }
    types
}

fn build_title(fields: &PropertyFields, brand: &str) -> String {
    let mut title = String::from("Commercial property");
    if fields.sale {
        title.push_str(" for sale");
    }
    if fields.rent {
        title.push_str(" to let");
    }
    title.push_str(&format!(
        " in {} {} | Ref: {} | {}",
        fields.town, fields.county, fields.reference, brand
    ));
    title
}

fn build_permalink(sale: bool, town: &str, reference: &str) -> String {
    let channel = if sale { "for-sale" } else { "to-let" };
    format!(
        "commercial-property-{channel}/{}/{reference}/",
        sanitize_title(town)
    )
}

/// Lowercase ASCII slug in the WordPress `save` style: accents folded,
/// `_` and `-` kept, other punctuation dropped, whitespace, `/` and `.`
/// turned into `-`, repeated `-` collapsed and trimmed.
pub fn sanitize_title(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for ch in raw.chars() {
        for c in fold_accent(ch).chars() {
            let mapped = match c.to_ascii_lowercase() {
                c @ ('a'..='z' | '0'..='9' | '_') => c,
                '-' | '/' | '.' | '\u{2013}' | '\u{2014}' => '-',
                c if c.is_whitespace() => '-',
                _ => continue,
            };
            if mapped == '-' && (slug.is_empty() || slug.ends_with('-')) {
                continue;
            }
            slug.push(mapped);
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn fold_accent(ch: char) -> Cow<'static, str> {
    let folded = match ch {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'Æ' | 'æ' => "ae",
        'Ç' | 'ç' => "c",
        'È' | 'É' | 'Ê' | 'Ë' | 'è' | 'é' | 'ê' | 'ë' => "e",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'ì' | 'í' | 'î' | 'ï' => "i",
        'Ñ' | 'ñ' => "n",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'Œ' | 'œ' => "oe",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'ù' | 'ú' | 'û' | 'ü' => "u",
        'Ý' | 'ý' | 'ÿ' | 'Ÿ' => "y",
        'ß' => "ss",
        _ => return Cow::Owned(ch.to_string()),
    };
    Cow::Borrowed(folded)
}

/// Numeric prefix of `raw` after leading whitespace; `0.0` when there is
/// none. `"12.5 sq m"` reads as `12.5`.
pub fn leading_number(raw: &str) -> f64 {
    let text = raw.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - digits_start;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        mantissa_digits += frac_end - frac_start;
        if mantissa_digits > 0 {
            end = frac_end;
        }
    }
    if mantissa_digits == 0 {
        return 0.0;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    text[..end].parse().unwrap_or(0.0)
}

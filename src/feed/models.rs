use serde::Serialize;

/// One `<property>` element of the feed, with every value kept as the raw
/// feed text. Interpretation happens in the field mapper.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedEntry {
    pub reference: String,
    pub address1: String,
    pub address2: String,
    pub address3: String,
    pub town: String,
    pub region: String,
    pub postcode: String,
    pub latitude: String,
    pub longitude: String,
    pub for_sale: String,
    pub to_let: String,
    pub freehold_price: String,
    pub asking_price: String,
    pub floor_area_min: String,
    pub virtual_tour_url: String,
    pub tenure: String,
    pub status: String,
    pub details: String,
    pub location_description: String,
    pub legal_information: String,
    pub financial_information: String,
    pub rateable_value: String,
    pub accommodation_dimensions: String,
    pub brochure_url: String,
    pub type_codes: Vec<String>,
    pub localities: Vec<String>,
    pub images: Vec<String>,
    pub floor_plans: Vec<String>,
}

impl FeedEntry {
    pub fn is_for_sale(&self) -> bool {
        self.for_sale == "Y"
    }

    pub fn is_to_let(&self) -> bool {
        self.to_let == "Y"
    }

    pub fn brochure(&self) -> Option<&str> {
        let url = self.brochure_url.trim();
        (!url.is_empty()).then_some(url)
    }

    pub fn featured_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }

    /// Images after the featured one.
    pub fn gallery_images(&self) -> &[String] {
        self.images.get(1..).unwrap_or(&[])
    }

    /// Floor plan sources with blank entries removed.
    pub fn floor_plan_urls(&self) -> Vec<String> {
        self.floor_plans
            .iter()
            .filter(|url| !url.is_empty())
            .cloned()
            .collect()
    }
}

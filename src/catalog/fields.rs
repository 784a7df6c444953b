use serde::{Deserialize, Serialize};

/// Every field the feed owns on a property record. Stores persist this as a
/// unit, so a renamed or missing field is a compile error rather than a
/// silently dropped key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyFields {
    pub reference: String,
    pub address: String,
    pub address2: String,
    pub address3: String,
    pub town: String,
    pub county: String,
    pub post_code: String,
    pub latitude: String,
    pub longitude: String,
    pub localities: Vec<String>,
    pub types: Vec<String>,
    pub price: String,
    pub floor_area: String,
    pub floor_area_sq_ft: i64,
    pub virtual_tour_url: String,
    pub tenure: String,
    pub sale: bool,
    pub rent: bool,
    pub status: String,
    pub description: String,
    pub location_description: String,
    pub legal_information: String,
    pub financial_information: String,
    pub rateable_value: String,
    pub accommodation_dimensions: String,
    pub feed_provided: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TitleUpdate {
    pub title: String,
    pub slug: String,
    pub permalink: String,
}

//! Fixtures shared by the unit tests of this crate.

use std::path::PathBuf;

use uuid::Uuid;
use wiremock::MockServer;

use catalogsync_generator::GeneratorClient;
use catalogsync_ingest::{RowTransformer, VendorRow};
use catalogsync_shared::{GeneratorConfig, Product, RetryPolicy};
use catalogsync_storage::Storage;

pub(crate) const CSV_HEADER: &str = "ProductName,ItemDescription,ProductDescription,ManufacturerID,Availability,QuantityOnHand,UnitPrice,PKG,ProductID,ItemID,ManufacturerItemCode,NDCItemCode,CategoryID,ImageFileName,ItemImageURL";

pub(crate) fn temp_path(prefix: &str, ext: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{prefix}_{}{ext}", Uuid::now_v7()))
}

pub(crate) async fn test_storage() -> Storage {
    Storage::open(&temp_path("cs_core", ".db"))
        .await
        .expect("open test db")
}

/// A product built through the real row transformer.
pub(crate) fn product(name: &str, description: Option<&str>) -> Product {
    let row = VendorRow {
        product_name: name.into(),
        item_description: format!("{name} item"),
        product_description: description.unwrap_or_default().into(),
        manufacturer_id: "M-1".into(),
        availability: "In Stock".into(),
        quantity_on_hand: "5".into(),
        unit_price: "9.95".into(),
        pkg: "BX".into(),
        product_id: format!("P-{name}"),
        item_id: format!("I-{name}"),
        manufacturer_item_code: "MIC".into(),
        ndc_item_code: "NDC".into(),
        category_id: "C-1".into(),
        image_file_name: Some(format!("{name}.jpg")),
        item_image_url: None,
    };
    RowTransformer::new("test-run")
        .transform(&row, 1)
        .expect("fixture row is valid")
}

/// A vendor CSV body with the full header and the given data lines.
pub(crate) fn csv_body(rows: &[String]) -> String {
    let mut body = String::from(CSV_HEADER);
    for row in rows {
        body.push('\n');
        body.push_str(row);
    }
    body.push('\n');
    body
}

/// A well-formed data line for a product called `name`.
pub(crate) fn csv_line(name: &str, price: &str) -> String {
    format!("{name},{name} item,,M-1,In Stock,3,{price},BX,P-{name},I-{name},MIC,NDC,C-1,,")
}

/// Generator client pointed at a mock server under `/v1`.
pub(crate) fn generator(server: &MockServer) -> GeneratorClient {
    let config = GeneratorConfig {
        base_url: format!("{}/v1", server.uri()),
        timeout_secs: 5,
        ..Default::default()
    };
    GeneratorClient::new(&config, "test-key".into(), RetryPolicy::none())
        .expect("build generator client")
}

//! Row → Product mapping.
//!
//! One vendor row becomes one product with exactly one variant. Numeric
//! fields are parsed defensively: a row whose `UnitPrice` is empty or not a
//! decimal, or whose `QuantityOnHand` is not an integer, is rejected as a
//! row-local `RowParse` error and never aborts the stream. An empty
//! `QuantityOnHand` reads as zero on hand.

use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;

use catalogsync_shared::{
    CatalogSyncError, DocId, Image, Product, ProductData, ProductInfo, Result, Variant,
    VariantAttributes,
};

/// Actor recorded for every write made by the importer.
pub const SYSTEM_ACTOR: &str = "system";

/// `info.dataSource` of imported documents.
pub const DATA_SOURCE: &str = "CSV Import";

const PRODUCT_TYPE: &str = "Medical";
const PRICE_VISIBILITY: &str = "Public";
const CURRENCY: &str = "USD";
const NAMESPACE: &str = "medical";
const COMPANY_ID: &str = "12345";
const DEPLOYMENT_ID: &str = "1";
const DOC_TYPE: &str = "Product";
const ACTIVE: &str = "active";

/// One record of a vendor file, keyed by the vendor's column names.
#[derive(Debug, Clone, Deserialize)]
pub struct VendorRow {
    #[serde(rename = "ProductName")]
    pub product_name: String,
    #[serde(rename = "ItemDescription")]
    pub item_description: String,
    #[serde(rename = "ProductDescription")]
    pub product_description: String,
    #[serde(rename = "ManufacturerID")]
    pub manufacturer_id: String,
    #[serde(rename = "Availability")]
    pub availability: String,
    #[serde(rename = "QuantityOnHand")]
    pub quantity_on_hand: String,
    #[serde(rename = "UnitPrice")]
    pub unit_price: String,
    #[serde(rename = "PKG")]
    pub pkg: String,
    #[serde(rename = "ProductID")]
    pub product_id: String,
    #[serde(rename = "ItemID")]
    pub item_id: String,
    #[serde(rename = "ManufacturerItemCode")]
    pub manufacturer_item_code: String,
    #[serde(rename = "NDCItemCode")]
    pub ndc_item_code: String,
    #[serde(rename = "CategoryID")]
    pub category_id: String,
    #[serde(rename = "ImageFileName", default)]
    pub image_file_name: Option<String>,
    #[serde(rename = "ItemImageURL", default)]
    pub item_image_url: Option<String>,
}

/// Builds product documents for one import job.
#[derive(Debug, Clone)]
pub struct RowTransformer {
    transaction_id: String,
}

impl RowTransformer {
    /// Stamp every document with the job's run id as its transaction id.
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            transaction_id: run_id.into(),
        }
    }

    /// Map one row to a product. `line` is the 1-based data row number.
    pub fn transform(&self, row: &VendorRow, line: u64) -> Result<Product> {
        let name = row.product_name.trim();
        if name.is_empty() {
            return Err(CatalogSyncError::row(line, "empty ProductName"));
        }
        let price = parse_price(&row.unit_price)
            .map_err(|message| CatalogSyncError::row(line, message))?;
        let on_hand = parse_quantity(&row.quantity_on_hand)
            .map_err(|message| CatalogSyncError::row(line, message))?;

        let now = Utc::now();
        let images: Vec<Image> = non_empty(row.image_file_name.as_deref())
            .map(|file_name| Image {
                file_name: file_name.to_string(),
                cdn_link: non_empty(row.item_image_url.as_deref()).map(String::from),
                index: 0,
                alt: non_empty(Some(row.item_description.as_str())).map(String::from),
            })
            .into_iter()
            .collect();

        let variant = Variant {
            id: row.product_id.trim().to_string(),
            sku: row.ndc_item_code.trim().to_string(),
            item_code: row.ndc_item_code.trim().to_string(),
            manufacturer_item_code: row.manufacturer_item_code.trim().to_string(),
            manufacturer_item_id: row.item_id.trim().to_string(),
            description: row.item_description.trim().to_string(),
            attributes: VariantAttributes {
                packaging: row.pkg.trim().to_string(),
                description: row.product_description.trim().to_string(),
            },
            price,
            cost: price,
            currency: CURRENCY.into(),
            packaging: row.pkg.trim().to_string(),
            available: on_hand > 0,
            active: true,
            dimension_uom: None,
            height: None,
            width: None,
            volume: None,
            volume_uom: None,
            weight: None,
            weight_uom: None,
            option_name: String::new(),
            options_path: String::new(),
            option_items_path: String::new(),
            images: images.clone(),
        };

        Ok(Product {
            doc_id: DocId::new(),
            data: ProductData {
                name: name.to_string(),
                product_type: PRODUCT_TYPE.into(),
                short_description: row.item_description.trim().to_string(),
                description: non_empty(Some(row.product_description.as_str())).map(String::from),
                vendor_id: row.manufacturer_id.trim().to_string(),
                manufacturer_id: row.manufacturer_id.trim().to_string(),
                category_id: row.category_id.trim().to_string(),
                storefront_price_visibility: PRICE_VISIBILITY.into(),
                availability: row.availability.trim().to_string(),
                is_fragile: false,
                is_taxable: true,
                published: now.date_naive(),
                variants: vec![variant],
                options: Vec::new(),
                images,
            },
            info: ProductInfo {
                created_by: SYSTEM_ACTOR.into(),
                created_at: now,
                updated_by: SYSTEM_ACTOR.into(),
                updated_at: now,
                deleted_by: None,
                deleted_at: None,
                data_source: DATA_SOURCE.into(),
                company_status: ACTIVE.into(),
                transaction_id: self.transaction_id.clone(),
                skip_event: false,
                user_request_id: self.transaction_id.clone(),
            },
            doc_type: DOC_TYPE.into(),
            immutable: false,
            status: ACTIVE.into(),
            namespace: NAMESPACE.into(),
            company_id: COMPANY_ID.into(),
            deployment_id: DEPLOYMENT_ID.into(),
        })
    }
}

/// Trimmed value, or `None` when absent or blank.
fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Parse a unit price such as `19.99` or `$19.99`.
fn parse_price(raw: &str) -> std::result::Result<Decimal, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty UnitPrice".into());
    }
    let digits = trimmed.strip_prefix('$').unwrap_or(trimmed).replace(',', "");
    let price =
        Decimal::from_str(&digits).map_err(|_| format!("invalid UnitPrice '{trimmed}'"))?;
    if price.is_sign_negative() {
        return Err(format!("negative UnitPrice '{trimmed}'"));
    }
    Ok(price)
}

/// Parse an on-hand quantity; blank means nothing on hand.
fn parse_quantity(raw: &str) -> std::result::Result<i64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<i64>()
        .map_err(|_| format!("invalid QuantityOnHand '{trimmed}'"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn row() -> VendorRow {
        VendorRow {
            product_name: "Nitrile Gloves".into(),
            item_description: "Box of 100".into(),
            product_description: String::new(),
            manufacturer_id: "M-1".into(),
            availability: "In Stock".into(),
            quantity_on_hand: "12".into(),
            unit_price: "19.99".into(),
            pkg: "BX".into(),
            product_id: "P-1".into(),
            item_id: "I-1".into(),
            manufacturer_item_code: "MIC-1".into(),
            ndc_item_code: "NDC-1".into(),
            category_id: "C-1".into(),
            image_file_name: None,
            item_image_url: None,
        }
    }

    #[test]
    fn valid_rows_get_unique_ids_and_one_variant() {
        let transformer = RowTransformer::new("run-1");
        let mut seen = HashSet::new();
        for line in 1..=50 {
            let product = transformer.transform(&row(), line).expect("valid row");
            assert!(!product.doc_id.to_string().is_empty());
            assert!(seen.insert(product.doc_id.clone()), "duplicate docId");
            assert_eq!(product.data.variants.len(), 1);
        }
    }

    #[test]
    fn maps_fields_and_fixed_values() {
        let product = RowTransformer::new("run-7").transform(&row(), 1).unwrap();
        let variant = &product.data.variants[0];

        assert_eq!(product.data.name, "Nitrile Gloves");
        assert_eq!(product.data.short_description, "Box of 100");
        assert_eq!(product.data.description, None);
        assert_eq!(product.data.vendor_id, "M-1");
        assert_eq!(product.data.product_type, "Medical");
        assert_eq!(variant.price, Decimal::new(1999, 2));
        assert_eq!(variant.cost, variant.price);
        assert_eq!(variant.currency, "USD");
        assert_eq!(variant.sku, "NDC-1");
        assert_eq!(variant.manufacturer_item_id, "I-1");
        assert!(variant.available);
        assert_eq!(product.info.transaction_id, "run-7");
        assert_eq!(product.info.created_by, "system");
        assert!(product.info.deleted_at.is_none());
        assert!(product.info.deleted_by.is_none());
        assert_eq!(product.company_id, "12345");
    }

    #[test]
    fn zero_or_blank_quantity_is_unavailable() {
        let transformer = RowTransformer::new("run");
        let mut r = row();
        r.quantity_on_hand = "0".into();
        assert!(!transformer.transform(&r, 1).unwrap().data.variants[0].available);
        r.quantity_on_hand = "  ".into();
        assert!(!transformer.transform(&r, 1).unwrap().data.variants[0].available);
    }

    #[test]
    fn bad_numbers_are_row_errors() {
        let transformer = RowTransformer::new("run");
        let mut r = row();
        r.unit_price = "abc".into();
        let err = transformer.transform(&r, 4).unwrap_err();
        assert!(matches!(err, CatalogSyncError::RowParse { row: 4, .. }));

        let mut r = row();
        r.unit_price = String::new();
        assert!(transformer.transform(&r, 5).is_err());

        let mut r = row();
        r.quantity_on_hand = "many".into();
        assert!(transformer.transform(&r, 6).is_err());
    }

    #[test]
    fn currency_symbol_and_thousands_separator_are_accepted() {
        assert_eq!(parse_price("$1,250.00").unwrap(), Decimal::new(125000, 2));
        assert!(parse_price("-3").is_err());
    }

    #[test]
    fn image_attached_only_when_file_name_present() {
        let transformer = RowTransformer::new("run");

        let mut r = row();
        r.image_file_name = Some("   ".into());
        r.item_image_url = Some("https://cdn.example.com/x.jpg".into());
        let product = transformer.transform(&r, 1).unwrap();
        assert!(product.data.images.is_empty());
        assert!(product.data.variants[0].images.is_empty());

        r.image_file_name = Some("gloves.jpg".into());
        let product = transformer.transform(&r, 1).unwrap();
        assert_eq!(product.data.images.len(), 1);
        assert_eq!(product.data.images, product.data.variants[0].images);
        let image = &product.data.images[0];
        assert_eq!(image.index, 0);
        assert_eq!(image.cdn_link.as_deref(), Some("https://cdn.example.com/x.jpg"));
        assert_eq!(image.alt.as_deref(), Some("Box of 100"));
    }

    #[test]
    fn product_description_carried_when_present() {
        let mut r = row();
        r.product_description = "Powder-free, latex-free".into();
        let product = RowTransformer::new("run").transform(&r, 1).unwrap();
        assert_eq!(product.description(), Some("Powder-free, latex-free"));
    }
}

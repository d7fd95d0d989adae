//! Core domain types for CatalogSync product documents.
//!
//! Field names serialize in camelCase so the stored JSON documents keep the
//! layout consumers of the product collection expect (`docId`,
//! `data.description`, `info.createdAt`, ...).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// DocId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for product document identifiers (time-sortable).
///
/// Generated once per imported row; the idempotency key for upserts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(pub Uuid);

impl DocId {
    /// Generate a new time-sortable document identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DocId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

/// The canonical unit of storage: one imported product with its variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Globally unique document id.
    pub doc_id: DocId,
    /// Catalog payload.
    pub data: ProductData,
    /// Audit block.
    pub info: ProductInfo,
    /// Document kind tag.
    pub doc_type: String,
    /// Whether the document may be edited after import.
    pub immutable: bool,
    /// Lifecycle status (opaque to the pipeline).
    pub status: String,
    /// Tenancy namespace (opaque to the pipeline).
    pub namespace: String,
    /// Owning company (opaque to the pipeline).
    pub company_id: String,
    /// Deployment tag (opaque to the pipeline).
    pub deployment_id: String,
}

impl Product {
    /// Current description, treating an empty string as missing.
    pub fn description(&self) -> Option<&str> {
        self.data
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
    }
}

/// Nested catalog record of a [`Product`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductData {
    pub name: String,
    #[serde(rename = "type")]
    pub product_type: String,
    pub short_description: String,
    /// Long description; absent until imported or enriched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub vendor_id: String,
    pub manufacturer_id: String,
    pub category_id: String,
    pub storefront_price_visibility: String,
    pub availability: String,
    pub is_fragile: bool,
    pub is_taxable: bool,
    pub published: NaiveDate,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub options: Vec<ProductOption>,
    #[serde(default)]
    pub images: Vec<Image>,
}

/// One purchasable SKU within a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub sku: String,
    pub item_code: String,
    pub manufacturer_item_code: String,
    pub manufacturer_item_id: String,
    pub description: String,
    pub attributes: VariantAttributes,
    /// Unit price; serialized as a decimal string.
    pub price: Decimal,
    /// Unit cost; serialized as a decimal string.
    pub cost: Decimal,
    pub currency: String,
    pub packaging: String,
    pub available: bool,
    pub active: bool,
    pub dimension_uom: Option<String>,
    pub height: Option<Decimal>,
    pub width: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub volume_uom: Option<String>,
    pub weight: Option<Decimal>,
    pub weight_uom: Option<String>,
    pub option_name: String,
    pub options_path: String,
    pub option_items_path: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

/// Free-form variant attributes carried over from the vendor row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantAttributes {
    pub packaging: String,
    pub description: String,
}

/// A selectable product option (size, colour, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductOption {
    pub id: String,
    pub name: String,
    pub data_field: Option<String>,
    #[serde(default)]
    pub values: Vec<OptionValue>,
}

/// One value of a [`ProductOption`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionValue {
    pub id: String,
    pub name: String,
    pub value: String,
}

/// An image attached to a product and/or variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub file_name: String,
    pub cdn_link: Option<String>,
    /// Display index.
    #[serde(rename = "i")]
    pub index: u32,
    pub alt: Option<String>,
}

/// Audit block of a [`Product`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub data_source: String,
    pub company_status: String,
    pub transaction_id: String,
    /// Suppresses downstream event emission for this write.
    pub skip_event: bool,
    pub user_request_id: String,
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// A partial write replacing only `data.description` of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionUpdate {
    pub doc_id: DocId,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// One unit of work in the import queue: import a single vendor's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorJob {
    pub vendor_name: String,
    pub enqueued_at: DateTime<Utc>,
}

impl VendorJob {
    pub fn new(vendor_name: impl Into<String>) -> Self {
        Self {
            vendor_name: vendor_name.into(),
            enqueued_at: Utc::now(),
        }
    }
}

/// States of an import job.
///
/// `Connecting → Downloading → Ingesting → Enriching → Done`; any state may
/// move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Connecting,
    Downloading,
    Ingesting,
    Enriching,
    Done,
    Failed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Downloading => "downloading",
            Self::Ingesting => "ingesting",
            Self::Enriching => "enriching",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Whether the job may move from `self` to `next`.
    pub fn can_advance_to(&self, next: JobPhase) -> bool {
        use JobPhase::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Connecting, Downloading)
            | (Downloading, Ingesting)
            | (Ingesting, Enriching)
            | (Ingesting, Done)
            | (Enriching, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

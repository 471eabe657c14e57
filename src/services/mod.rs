//! Business logic services.

pub mod catalog;
pub mod dispatcher;
pub mod pipeline;
pub mod placement;
pub mod presentation;
pub mod storage;
pub mod transfer;
pub mod validator;
pub mod warehouse;

pub use catalog::StageCatalog;
pub use dispatcher::QueryDispatcher;
pub use pipeline::{AnalysisPipeline, AnalysisRequest, StagedAnalysisRequest};
pub use placement::{AssetPlacement, BlobPlacement, StagePlacement};
pub use storage::Storage;
pub use transfer::StageTransfer;
pub use validator::ImageValidator;
pub use warehouse::{SnowflakeWarehouse, Warehouse, WarehouseSession};

//! `tabletop-runtime` – the request/response service around the perception
//! stages.
//!
//! # Modules
//!
//! - [`ingest`] – [`LatestCloud`]: single-slot mailbox the sensor publishes
//!   into; readers take immutable snapshots.
//! - [`frame`] – [`FrameTransformer`]: waits for a frame and a sensor → fixed
//!   frame transform, then re-expresses the cloud.
//! - [`pipeline`] – [`TabletopPipeline`]: the public operations (plane
//!   segmentation, tabletop extraction, object clustering, pixel and region
//!   selection).  One invocation runs at a time.
//! - [`config`] – [`PipelineConfig`]: every tuning parameter, TOML
//!   deserializable, with `TABLETOP_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`]: `tracing` subscriber with optional OTLP
//!   span export.

pub mod config;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod telemetry;

pub use config::{PipelineConfig, apply_env_overrides};
pub use frame::FrameTransformer;
pub use ingest::LatestCloud;
pub use pipeline::TabletopPipeline;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};

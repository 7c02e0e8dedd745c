// src/pipeline/mod.rs
//
// Session orchestration around the analysis components.
//
//   capture → GuidanceEngine::tick ─┬→ GuidanceFrame (presentation)
//                │                  └→ EventBus / PipelineMetrics (driver logs)
//                └─ DetectorHandle ⇄ detection worker (blocking pool)

pub mod detection_worker;
pub mod engine;
pub mod event_bus;
pub mod guidance;
pub mod metrics;
pub mod session;

pub use detection_worker::spawn_detection_worker;
pub use engine::GuidanceEngine;
pub use event_bus::GuidanceEvent;
pub use guidance::GuidanceFrame;
pub use metrics::PipelineMetrics;
pub use session::SessionState;

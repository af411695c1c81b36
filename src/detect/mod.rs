mod backend;
mod backends;
pub mod labels;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::{CpuBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{run_detection, BackendRegistry, SharedDetector};
pub use result::{non_max_suppression, Detection, DetectionResult};

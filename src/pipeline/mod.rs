pub mod camera;
pub mod compositor;
pub mod device;
#[cfg(feature = "camera-nokhwa")]
pub mod frame_decoder;
pub mod inference;
pub mod orchestrator;
pub mod orientation;
pub mod packer;
pub mod renderer;
pub mod resize;
pub mod smoother;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::CameraSource;
pub use compositor::load_background;
pub use device::DeviceSink;
pub use inference::ort::{OrtOrientationClassifier, OrtSegmenter};
pub use orchestrator::Pipeline;
pub use orientation::Projection;
pub use renderer::SpriteRenderer;

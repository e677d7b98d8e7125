pub mod capture;
pub mod device;

pub use capture::{CaptureOptions, list_devices};
pub use device::DeviceAdapter;

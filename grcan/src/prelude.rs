//! Traits needed to use frames and channels
pub use crate::message::FrameFormat as _;
pub use embedded_can::nb::Can as _;
pub use embedded_can::Frame as _;

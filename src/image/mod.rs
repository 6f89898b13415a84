pub mod buffer;
pub mod io;
pub mod traits;

pub use self::buffer::{ImageBuffer, ImageF32, ImageU8, Sample};
pub use self::traits::{ImageView, ImageViewMut, Rows};

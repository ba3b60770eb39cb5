mod mac;
mod reading;
mod value;

pub use mac::*;
pub use reading::*;
pub use value::*;

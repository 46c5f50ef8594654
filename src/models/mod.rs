pub mod codes;
pub mod enums;
pub mod gps;
pub mod hospital;
pub mod outbox;
pub mod visit;
pub mod voice_note;

pub use codes::*;
pub use enums::*;
pub use gps::*;
pub use hospital::*;
pub use outbox::*;
pub use visit::*;
pub use voice_note::*;

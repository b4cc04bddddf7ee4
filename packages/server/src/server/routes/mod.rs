// HTTP routes
pub mod domains;
pub mod health;
pub mod jobs;
pub mod queues;
pub mod stream;

pub use domains::*;
pub use health::*;
pub use jobs::*;
pub use queues::*;
pub use stream::*;

mod cache;
mod queue;
mod vars;

pub use cache::MemCache;
pub use queue::Queue;
pub use vars::Vars;

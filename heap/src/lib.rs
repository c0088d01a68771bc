mod heap;
mod map;
mod store;
mod visitor;

pub use heap::*;
pub use store::ObjectStore;
pub use visitor::{Edges, EdgesMut, Visitable, Visitor};

use std::sync::{Arc, RwLock};

use crate::error::ShoalError;

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type ShoalResult = Result<(), ShoalError>;

/// A key/value pair as handed back by range and member queries.
pub type KvPair = (Vec<u8>, Vec<u8>);

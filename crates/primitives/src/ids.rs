//! Opaque identifiers handed to us by the chain.  We never look inside them,
//! they're only compared and hashed.

use serde::{Deserialize, Serialize};

/// Hash of a block as reported by the event source.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(String);
impl_str_id!(BlockHash);

/// Identifier of a submitted transaction.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);
impl_str_id!(TxId);

//! Common byte-oriented types the index trait family trades in.

use std::collections::HashMap;

/// An opaque row location token. The execution layer resolves it to a row;
/// indexes and drivers treat it as a plain byte string.
pub type Location = Vec<u8>;

/// An encoded index key. Drivers own the encoding of column values into
/// keys; the registry and the lookup contracts treat keys as ordered bytes.
pub type IndexKey = Vec<u8>;

/// Driver configuration options. Keys and values are opaque to the
/// registry; each driver documents the options it recognizes.
pub type DriverConfig = HashMap<String, String>;

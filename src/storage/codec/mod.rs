mod btree_page;
mod common;
mod index_roots_page;
mod table_page;
mod tuple;

pub use btree_page::{
    BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec, BPlusTreePageCodec,
    BPlusTreePageTypeCodec,
};
pub use common::CommonCodec;
pub use index_roots_page::IndexRootsPageCodec;
pub use table_page::TablePageCodec;
pub use tuple::{RidCodec, ScalarValueCodec, TupleCodec};

// decoded value + consumed byte count
pub type DecodedData<T> = (T, usize);

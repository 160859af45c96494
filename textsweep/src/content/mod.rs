//! Reading file content: charset decoding, character views and binary
//! classification.
pub mod classifier;
pub mod decode;
pub mod scratch;
pub mod view;

pub use classifier::{
    Classified, ContentClassifier, ContentSource, ContentType, ContentTypeStrategy,
    ExtensionContentType,
};
pub use decode::{read_within, resolve_encoding, DecodedStream};
pub use scratch::ScratchPool;
pub use view::{BufferedFileView, CharView, StringView, ViewOptions};

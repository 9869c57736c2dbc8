//! Argument codecs for event buffers.
//!
//! [`generate_decoder`] builds a [`Decoder`] specialised to one argument
//! layout. The encoders in [`encoder`] produce the matching byte layouts and
//! are used by the container writer.

pub mod decoder;
pub mod encoder;
pub mod reader;
pub mod string_table;

pub use decoder::{generate_decoder, Decoder, DecoderCache, NULL_ARRAY};
pub use encoder::{encode_legacy, encode_packed};
pub use reader::{LegacyReader, PackedInput};
pub use string_table::{StringTable, StringTableBuilder, NULL_STRING};

//! Resolution of resource parts.
//!
//! A resource part either carries its payload inline or refers to data the
//! embedder fetches elsewhere. A resolver turns the part bytes into a
//! [`Resource`] now, or hands back a channel the payload will arrive on.

use std::sync::mpsc::Receiver;

use crate::db::source::Resource;
use crate::error::{Result, TraceError};
use crate::wire::chunk::PartType;

pub enum Resolution {
    Ready(Resource),
    /// Payload still in flight. The chunk holding the part waits for it,
    /// and so does every chunk framed after it.
    Deferred(Receiver<Result<Resource>>),
}

pub trait ResourceResolver {
    /// Resolve the bytes of a `BinaryResource` or `StringResource` part.
    fn resolve(&mut self, part_type: PartType, data: &[u8]) -> Result<Resolution>;
}

/// Treats every resource part as carrying its payload inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineResolver;

impl ResourceResolver for InlineResolver {
    fn resolve(&mut self, part_type: PartType, data: &[u8]) -> Result<Resolution> {
        let resource = match part_type {
            PartType::StringResource => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| TraceError::fatal(format!("string resource is not UTF-8: {e}")))?;
                Resource::Text(text.to_string())
            }
            _ => Resource::Binary(data.to_vec()),
        };
        Ok(Resolution::Ready(resource))
    }
}

impl<F> ResourceResolver for F
where
    F: FnMut(PartType, &[u8]) -> Result<Resolution>,
{
    fn resolve(&mut self, part_type: PartType, data: &[u8]) -> Result<Resolution> {
        self(part_type, data)
    }
}

//! Content-type keyed body decoders.
//!
//! A [`DecoderRegistry`] maps a request's `Content-Type` media type to a
//! [`ContentDecoder`], so handlers can read `application/json` or
//! `application/x-www-form-urlencoded` bodies as structured data instead of
//! raw bytes. The registry ships with a built-in form decoder; register more
//! with [`DecoderRegistry::register`].

use crate::{
    http::types::ContentType,
    query::{percent_decode, Error as QueryError, Query},
};
use std::{collections::HashMap, error, fmt};

/// A decoded request body: either raw key/value pairs (forms) or an opaque
/// byte payload a caller-supplied decoder produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedContent {
    /// `key=value` pairs, percent-decoded, in the order they appeared.
    Form(Vec<(Vec<u8>, Vec<u8>)>),
    /// Bytes produced by a custom decoder, left for the caller to interpret.
    Bytes(Vec<u8>),
}

/// A function that turns a raw body into [`DecodedContent`].
pub trait ContentDecoder: Fn(&[u8]) -> Result<DecodedContent, DecodeError> + Send + Sync {}

impl<F> ContentDecoder for F where F: Fn(&[u8]) -> Result<DecodedContent, DecodeError> + Send + Sync {}

/// Registry of content decoders, keyed by media type (the part of
/// `Content-Type` before any `;` parameters, e.g. `application/json`).
///
/// # Examples
/// ```
/// use pinion::decoders::{DecodedContent, DecoderRegistry};
///
/// let mut registry = DecoderRegistry::new();
/// registry.register("text/plain", |body| Ok(DecodedContent::Bytes(body.to_vec())));
///
/// let decoded = registry.decode("text/plain", b"hello").unwrap();
/// assert_eq!(decoded, DecodedContent::Bytes(b"hello".to_vec()));
/// ```
pub struct DecoderRegistry {
    decoders: HashMap<Box<[u8]>, Box<dyn ContentDecoder>>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderRegistry {
    /// Builds a registry pre-populated with the built-in
    /// `application/x-www-form-urlencoded` decoder.
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: HashMap::new(),
        };
        registry.register("application/x-www-form-urlencoded", decode_form);
        registry
    }

    /// Registers a decoder for `media_type`, replacing any existing one.
    pub fn register<F>(&mut self, media_type: &str, decoder: F)
    where
        F: ContentDecoder + 'static,
    {
        self.decoders
            .insert(media_type.as_bytes().into(), Box::new(decoder));
    }

    /// Decodes `body` using the decoder registered for `media_type`.
    ///
    /// # Errors
    /// Returns [`DecodeError::NoDecoder`] if nothing is registered for
    /// `media_type`, or whatever the decoder itself returns.
    pub fn decode(&self, media_type: &str, body: &[u8]) -> Result<DecodedContent, DecodeError> {
        let decoder = self
            .decoders
            .get(media_type.as_bytes())
            .ok_or(DecodeError::NoDecoder)?;
        decoder(body)
    }

    /// Convenience wrapper around [`decode`](Self::decode) taking a parsed
    /// [`ContentType`] directly.
    pub fn decode_for(&self, content_type: &ContentType, body: &[u8]) -> Result<DecodedContent, DecodeError> {
        let media = std::str::from_utf8(content_type.media_type()).map_err(|_| DecodeError::NoDecoder)?;
        self.decode(media, body)
    }
}

fn decode_form(body: &[u8]) -> Result<DecodedContent, DecodeError> {
    let pairs: Vec<(&[u8], &[u8])> = Query::parse(body, 256)?;
    let decoded = pairs
        .into_iter()
        .map(|(k, v)| (percent_decode(k), percent_decode(v)))
        .collect();
    Ok(DecodedContent::Form(decoded))
}

/// Errors returned while decoding a body.
#[derive(Debug, PartialEq)]
pub enum DecodeError {
    /// No decoder is registered for the requested media type.
    NoDecoder,
    /// The built-in form decoder rejected the body.
    Query(QueryError),
}

impl From<QueryError> for DecodeError {
    fn from(err: QueryError) -> Self {
        DecodeError::Query(err)
    }
}

impl error::Error for DecodeError {}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NoDecoder => write!(f, "no decoder registered for this content type"),
            DecodeError::Query(err) => write!(f, "invalid form body: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_form_body() {
        let registry = DecoderRegistry::new();
        let decoded = registry
            .decode("application/x-www-form-urlencoded", b"name=jane+doe&tag=a%2Bb")
            .unwrap();

        assert_eq!(
            decoded,
            DecodedContent::Form(vec![
                (b"name".to_vec(), b"jane doe".to_vec()),
                (b"tag".to_vec(), b"a+b".to_vec()),
            ])
        );
    }

    #[test]
    fn missing_decoder_is_an_error() {
        let registry = DecoderRegistry::new();
        assert_eq!(
            registry.decode("application/json", b"{}"),
            Err(DecodeError::NoDecoder)
        );
    }

    #[test]
    fn custom_decoder_can_be_registered() {
        let mut registry = DecoderRegistry::new();
        registry.register("text/plain", |body| Ok(DecodedContent::Bytes(body.to_vec())));

        assert_eq!(
            registry.decode("text/plain", b"hi").unwrap(),
            DecodedContent::Bytes(b"hi".to_vec())
        );
    }
}

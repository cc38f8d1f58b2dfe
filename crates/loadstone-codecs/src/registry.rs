//! The codec registry: exact `(external format, CQL type)` lookup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use loadstone_types::error::CodecError;
use loadstone_types::value::{CqlType, CqlValue, ExternalFormat, ExternalValue};

use crate::context::ConversionContext;
use crate::json;
use crate::text;

/// The registry capability consumed by the mapper: exact lookup plus
/// enumeration of the formats convertible to a given internal type.
pub trait CodecLookup: Send + Sync {
    fn lookup(&self, format: ExternalFormat, internal: &CqlType) -> Result<Arc<Codec>, CodecError>;

    fn formats_for_internal(&self, internal: &CqlType) -> Vec<ExternalFormat>;
}

/// A bidirectional converter bound to one `(format, type)` pair and one
/// conversion context.
#[derive(Debug)]
pub struct Codec {
    format: ExternalFormat,
    internal: CqlType,
    ctx: Arc<ConversionContext>,
}

impl Codec {
    pub fn internal_type(&self) -> &CqlType {
        &self.internal
    }

    /// External to internal. Null-sentinel and empty-string rules apply
    /// here, before any per-type parsing:
    ///
    /// - a configured null string converts to the typed null;
    /// - a typed external null converts to the typed null;
    /// - an empty string bound to a non-textual type converts to null
    ///   regardless of configuration.
    pub fn external_to_internal(&self, value: &ExternalValue) -> Result<CqlValue, CodecError> {
        match value {
            ExternalValue::Null => Ok(CqlValue::Null),
            ExternalValue::Text(raw) => {
                if self.ctx.is_null_string(raw) {
                    return Ok(CqlValue::Null);
                }
                if raw.is_empty() && !self.internal.is_textual() {
                    return Ok(CqlValue::Null);
                }
                text::parse(raw, &self.internal, &self.ctx)
            }
            ExternalValue::Json(json) => {
                if json.is_null() {
                    return Ok(CqlValue::Null);
                }
                if let Some(raw) = json.as_str() {
                    if self.ctx.is_null_string(raw) {
                        return Ok(CqlValue::Null);
                    }
                    if raw.is_empty() && !self.internal.is_textual() {
                        return Ok(CqlValue::Null);
                    }
                }
                json::parse(json, &self.internal, &self.ctx)
            }
        }
    }

    /// Internal to external. A null unloads to the first configured null
    /// string (or the empty string) for text sinks, and to the typed null
    /// for JSON sinks.
    pub fn internal_to_external(&self, value: &CqlValue) -> Result<ExternalValue, CodecError> {
        if value.is_null() {
            return Ok(match self.format {
                ExternalFormat::Text => ExternalValue::Text(self.ctx.null_output().to_string()),
                ExternalFormat::Json => ExternalValue::Json(serde_json::Value::Null),
            });
        }
        match self.format {
            ExternalFormat::Text => {
                text::format(value, &self.ctx).map(ExternalValue::Text)
            }
            ExternalFormat::Json => json::format(value, &self.ctx).map(ExternalValue::Json),
        }
    }
}

/// Maps `(external format, internal CQL type)` pairs to codecs. Built once
/// from a conversion context; immutable afterwards and freely shared.
pub struct CodecRegistry {
    ctx: Arc<ConversionContext>,
    cache: RwLock<HashMap<(ExternalFormat, CqlType), Arc<Codec>>>,
}

impl CodecRegistry {
    pub fn new(ctx: ConversionContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &ConversionContext {
        &self.ctx
    }

    /// Whether a conversion graph exists for `internal`. Map keys must be
    /// scalar, counters cannot nest inside collections, and geometries
    /// cannot nest at all.
    fn supports(internal: &CqlType) -> bool {
        fn scalar(ty: &CqlType) -> bool {
            !matches!(
                ty,
                CqlType::List(_)
                    | CqlType::Set(_)
                    | CqlType::Map(_, _)
                    | CqlType::Counter
                    | CqlType::Point
                    | CqlType::LineString
                    | CqlType::Polygon
            )
        }
        fn nestable(ty: &CqlType) -> bool {
            match ty {
                CqlType::Counter | CqlType::Point | CqlType::LineString | CqlType::Polygon => {
                    false
                }
                other => CodecRegistry::supports(other),
            }
        }
        match internal {
            CqlType::List(elem) | CqlType::Set(elem) => nestable(elem),
            CqlType::Map(key, value) => scalar(key) && nestable(value),
            _ => true,
        }
    }
}

impl CodecLookup for CodecRegistry {
    fn lookup(&self, format: ExternalFormat, internal: &CqlType) -> Result<Arc<Codec>, CodecError> {
        if let Some(codec) = self.cache.read().expect("registry cache").get(&(format, internal.clone())) {
            return Ok(Arc::clone(codec));
        }
        if !Self::supports(internal) {
            return Err(CodecError::NoCodecFound {
                external: format,
                internal: internal.clone(),
            });
        }
        let codec = Arc::new(Codec {
            format,
            internal: internal.clone(),
            ctx: Arc::clone(&self.ctx),
        });
        self.cache
            .write()
            .expect("registry cache")
            .insert((format, internal.clone()), Arc::clone(&codec));
        Ok(codec)
    }

    fn formats_for_internal(&self, internal: &CqlType) -> Vec<ExternalFormat> {
        if Self::supports(internal) {
            vec![ExternalFormat::Text, ExternalFormat::Json]
        } else {
            Vec::new()
        }
    }
}

//! Detection of a disallowed compressor in an array's codec pipeline.

use serde_json::Value;

use crate::codecs::sharding::ShardingCodec;
use crate::codecs::{AnyCodec, Compression, validate_pipeline};

/// Where the disallowed compressor sits in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecLocation {
    TopLevel,
    ShardInner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    Clean,
    NeedsMigration {
        location: CodecLocation,
        found: Compression,
    },
    /// The pipeline is neither flat nor a single level of sharding, so no
    /// decision is made about it.
    Ambiguous { reason: String },
}

impl Inspection {
    pub fn needs_migration(&self) -> bool {
        matches!(self, Inspection::NeedsMigration { .. })
    }
}

fn find_disallowed(codecs: &[AnyCodec], disallowed: &str) -> Option<Compression> {
    codecs
        .iter()
        .filter_map(AnyCodec::compression)
        .find(|c| c.name.eq_ignore_ascii_case(disallowed))
}

/// Inspect `codecs` for a compressor named `disallowed`.
///
/// Recognized shapes are a flat pipeline and a pipeline with exactly one
/// top-level sharding codec whose inner codecs are flat. Both the inner
/// list and the top level are scanned.
pub fn inspect_pipeline(codecs: &[AnyCodec], disallowed: &str) -> Inspection {
    if let Err(e) = validate_pipeline(codecs) {
        return Inspection::Ambiguous {
            reason: e.to_string(),
        };
    }
    let shards: Vec<&ShardingCodec> = codecs
        .iter()
        .filter_map(|c| match c {
            AnyCodec::Sharding(s) => Some(s),
            _ => None,
        })
        .collect();

    let inner = match shards.as_slice() {
        [] => None,
        [shard] => {
            if shard
                .codecs
                .iter()
                .any(|c| matches!(c, AnyCodec::Sharding(_)))
            {
                return Inspection::Ambiguous {
                    reason: "sharding codec nested inside a sharding codec".into(),
                };
            }
            Some(find_disallowed(&shard.codecs, disallowed))
        }
        _ => {
            return Inspection::Ambiguous {
                reason: format!("{} top-level sharding codecs", shards.len()),
            };
        }
    };

    if let Some(Some(found)) = inner {
        return Inspection::NeedsMigration {
            location: CodecLocation::ShardInner,
            found,
        };
    }
    match find_disallowed(codecs, disallowed) {
        Some(found) => Inspection::NeedsMigration {
            location: CodecLocation::TopLevel,
            found,
        },
        None => Inspection::Clean,
    }
}

/// Compression names found in an array document that could not be typed,
/// including codecs nested in a codec's configuration. Blosc is named after
/// its sub-compressor, as in [`Compression`].
pub fn raw_compression_names(document: &Value) -> Vec<String> {
    let mut names = Vec::new();
    let mut pending = vec![document];
    while let Some(node) = pending.pop() {
        let Some(codecs) = node.get("codecs").and_then(Value::as_array) else {
            continue;
        };
        for codec in codecs {
            let config = codec.get("configuration");
            match codec.get("name").and_then(Value::as_str) {
                Some("blosc") => {
                    let cname = config
                        .and_then(|c| c.get("cname"))
                        .and_then(Value::as_str)
                        .unwrap_or("zstd");
                    names.push(format!("blosc-{cname}"));
                }
                Some(name) => names.push(name.to_string()),
                None => {}
            }
            pending.extend(config);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::bytes::BytesCodec;
    use crate::types::{DataType, Endian};
    use crate::writer::codec_pipeline;

    fn sharded(compression: &str, level: i32) -> Vec<AnyCodec> {
        codec_pipeline(
            DataType::Float32,
            Endian::Little,
            &Compression::new(compression, level),
            Some(vec![64, 64]),
        )
        .unwrap()
    }

    fn flat(compression: &str, level: i32) -> Vec<AnyCodec> {
        codec_pipeline(
            DataType::Float32,
            Endian::Little,
            &Compression::new(compression, level),
            None,
        )
        .unwrap()
    }

    #[test]
    fn zstd_inside_a_shard_is_flagged() {
        assert_eq!(
            inspect_pipeline(&sharded("zstd", 0), "zstd"),
            Inspection::NeedsMigration {
                location: CodecLocation::ShardInner,
                found: Compression::new("zstd", 0),
            }
        );
    }

    #[test]
    fn top_level_zstd_is_flagged() {
        let inspection = inspect_pipeline(&flat("zstd", 3), "ZSTD");
        assert!(inspection.needs_migration());
        assert!(matches!(
            inspection,
            Inspection::NeedsMigration {
                location: CodecLocation::TopLevel,
                ..
            }
        ));
    }

    #[test]
    fn other_compressors_are_clean() {
        assert_eq!(inspect_pipeline(&flat("lz4", 1), "zstd"), Inspection::Clean);
        assert_eq!(
            inspect_pipeline(&sharded("blosc-zstd", 5), "zstd"),
            Inspection::Clean
        );
        let bytes_only = vec![AnyCodec::Bytes(BytesCodec::default())];
        assert_eq!(inspect_pipeline(&bytes_only, "zstd"), Inspection::Clean);
    }

    #[test]
    fn compressors_around_the_shard_are_scanned() {
        let mut codecs = sharded("lz4", 1);
        codecs.extend(flat("zstd", 1).into_iter().skip(1));
        assert!(matches!(
            inspect_pipeline(&codecs, "zstd"),
            Inspection::NeedsMigration {
                location: CodecLocation::TopLevel,
                ..
            }
        ));
    }

    #[test]
    fn nested_sharding_is_ambiguous() {
        let inner = sharded("zstd", 1);
        let outer = vec![AnyCodec::Sharding(ShardingCodec::new(vec![128, 128], inner))];
        assert!(matches!(
            inspect_pipeline(&outer, "zstd"),
            Inspection::Ambiguous { .. }
        ));
    }

    #[test]
    fn untyped_documents_are_scanned_through_shards() {
        let doc = serde_json::json!({
            "node_type": "array",
            "codecs": [{
                "name": "sharding_indexed",
                "configuration": {
                    "chunk_shape": [8, 8],
                    "codecs": [
                        {"name": "transpose", "configuration": {"order": [1, 0]}},
                        {"name": "bytes"},
                        {"name": "blosc", "configuration": {"cname": "zstd", "clevel": 5}}
                    ],
                    "index_codecs": [{"name": "bytes"}, {"name": "crc32c"}]
                }
            }, {"name": "zstd", "configuration": {"level": 1}}]
        });
        let mut names = raw_compression_names(&doc);
        names.sort();
        assert_eq!(
            names,
            vec!["blosc-zstd", "bytes", "sharding_indexed", "transpose", "zstd"]
        );
    }

    #[test]
    fn invalid_pipelines_are_ambiguous() {
        let codecs: Vec<AnyCodec> = flat("zstd", 1).into_iter().skip(1).collect();
        assert!(matches!(
            inspect_pipeline(&codecs, "zstd"),
            Inspection::Ambiguous { .. }
        ));
    }
}

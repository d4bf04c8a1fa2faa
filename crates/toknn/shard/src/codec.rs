//! JSON payloads through gzip or zstd, written atomically.

use std::io::Write as _;

use eyre::WrapErr as _;

/// Zstd level for published artifacts; they are written once and read many times.
const ZSTD_LEVEL: i32 = 19;

/// Write `path` through a temp file in the same directory, then rename it into place.
///
/// Returns the number of bytes written.
pub(crate) fn write_atomic(
    path: &std::path::Path,
    write: impl FnOnce(&mut dyn std::io::Write) -> eyre::Result<()>,
) -> eyre::Result<u64> {
    let dir = path
        .parent()
        .ok_or_else(|| eyre::eyre!("artifact path {} has no parent", path.display()))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .wrap_err_with(|| format!("failed to create temp file in {}", dir.display()))?;

    {
        let mut writer = std::io::BufWriter::with_capacity(256 * 1024, temp.as_file_mut());
        write(&mut writer)?;
        writer
            .flush()
            .wrap_err_with(|| format!("failed to flush {}", path.display()))?;
    }

    let bytes = temp
        .as_file()
        .metadata()
        .wrap_err("failed to stat temp file")?
        .len();

    temp.persist(path)
        .wrap_err_with(|| format!("failed to move artifact into {}", path.display()))?;

    Ok(bytes)
}

/// Serialize `value` as JSON, compress it with `codec` and write it atomically.
pub(crate) fn write_compressed<T: serde::Serialize + ?Sized>(
    path: &std::path::Path,
    codec: toknn_core::Codec,
    value: &T,
) -> eyre::Result<u64> {
    write_atomic(path, |out| match codec {
        toknn_core::Codec::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(out, flate2::Compression::best());
            serde_json::to_writer(&mut encoder, value).wrap_err("failed to encode JSON")?;
            encoder.finish().wrap_err("failed to finish gzip stream")?;
            Ok(())
        }
        toknn_core::Codec::Zstd => {
            let mut encoder = zstd::stream::write::Encoder::new(out, ZSTD_LEVEL)
                .wrap_err("failed to create zstd encoder")?;
            serde_json::to_writer(&mut encoder, value).wrap_err("failed to encode JSON")?;
            encoder.finish().wrap_err("failed to finish zstd stream")?;
            Ok(())
        }
    })
}

/// Decompress and parse a JSON artifact.
pub(crate) fn read_compressed<T: serde::de::DeserializeOwned>(
    path: &std::path::Path,
    codec: toknn_core::Codec,
) -> eyre::Result<T> {
    let file = std::fs::File::open(path)
        .wrap_err_with(|| format!("failed to open {}", path.display()))?;
    let reader = std::io::BufReader::new(file);

    let value = match codec {
        toknn_core::Codec::Gzip => serde_json::from_reader(std::io::BufReader::new(
            flate2::read::GzDecoder::new(reader),
        )),
        toknn_core::Codec::Zstd => {
            let decoder = zstd::stream::read::Decoder::with_buffer(reader)
                .wrap_err("failed to create zstd decoder")?;
            serde_json::from_reader(std::io::BufReader::new(decoder))
        }
    };

    value.wrap_err_with(|| format!("failed to decode {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strings.json.gz");
        let value = vec!["hello".to_string(), " wörld".to_string(), "\n\"".to_string()];

        let bytes = write_compressed(&path, toknn_core::Codec::Gzip, &value).unwrap();
        assert_eq!(bytes, std::fs::metadata(&path).unwrap().len());

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b], "gzip magic");

        let back: Vec<String> = read_compressed(&path, toknn_core::Codec::Gzip).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_zstd_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.json.zst");
        let value: Vec<u32> = (0..1000).collect();

        write_compressed(&path, toknn_core::Codec::Zstd, &value).unwrap();
        let back: Vec<u32> = read_compressed(&path, toknn_core::Codec::Zstd).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_wrong_codec_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json.gz");
        write_compressed(&path, toknn_core::Codec::Gzip, &[1, 2, 3]).unwrap();
        assert!(read_compressed::<Vec<u32>>(&path, toknn_core::Codec::Zstd).is_err());
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        let result = write_atomic(&path, |_| eyre::bail!("boom"));
        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

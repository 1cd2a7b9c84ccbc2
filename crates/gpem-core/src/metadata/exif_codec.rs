use std::io::{self, Cursor};
use std::path::Path;

use chrono::NaiveDateTime;
use exif::experimental::Writer;
use exif::{Context, Field, In, Reader, Tag, Value};
use img_parts::jpeg::Jpeg;
use img_parts::png::Png;
use img_parts::{Bytes, ImageEXIF};
use thiserror::Error;

use crate::geo::{deg_to_dms_rational, find_rational, GeoData, ALTITUDE_MAX_DENOMINATOR};

pub const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ExifError {
    #[error("failed to read EXIF: {0}")]
    Read(#[from] exif::Error),

    #[error("failed to encode EXIF: {0}")]
    Encode(exif::Error),

    #[error("failed to parse {kind:?} container: {message}")]
    Container { kind: ImageKind, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Still-image containers that can carry an embedded EXIF block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Tags the writer synthesizes itself; copying them over would duplicate them.
const SYNTHESIZED_TAGS: &[Tag] = &[
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
    Tag::StripOffsets,
    Tag::StripByteCounts,
    Tag::TileOffsets,
    Tag::TileByteCounts,
];

/// Editable set of primary-image EXIF fields.
#[derive(Debug, Default)]
pub struct ExifTags {
    fields: Vec<Field>,
}

impl ExifTags {
    /// Read the EXIF block of an image. An image without EXIF yields an empty set.
    ///
    /// Thumbnail fields and values the writer cannot re-encode are dropped.
    pub fn load(image: &[u8]) -> Result<Self, ExifError> {
        let exif = match Reader::new().read_from_container(&mut Cursor::new(image)) {
            Ok(exif) => exif,
            Err(exif::Error::NotFound(_)) => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let fields = exif
            .fields()
            .filter(|f| f.ifd_num == In::PRIMARY)
            .filter(|f| !SYNTHESIZED_TAGS.contains(&f.tag))
            .filter(|f| !matches!(f.value, Value::Unknown(..)))
            .map(|f| Field {
                tag: f.tag,
                ifd_num: f.ifd_num,
                value: f.value.clone(),
            })
            .collect();

        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, tag: Tag) -> Option<&Field> {
        self.fields.iter().find(|f| f.tag == tag)
    }

    /// Insert a primary-image field, replacing any field with the same tag.
    pub fn set(&mut self, tag: Tag, value: Value) {
        self.fields.retain(|f| f.tag != tag);
        self.fields.push(Field {
            tag,
            ifd_num: In::PRIMARY,
            value,
        });
    }

    /// Replace the whole GPS directory with the given coordinates.
    pub fn set_gps(&mut self, geo: &GeoData) {
        self.fields.retain(|f| f.tag.context() != Context::Gps);

        self.set(Tag::GPSVersionID, Value::Byte(vec![2, 2, 0, 0]));
        self.set(
            Tag::GPSLatitudeRef,
            Value::Ascii(vec![geo.latitude_ref().as_bytes().to_vec()]),
        );
        self.set(
            Tag::GPSLatitude,
            Value::Rational(deg_to_dms_rational(geo.latitude).to_vec()),
        );
        self.set(
            Tag::GPSLongitudeRef,
            Value::Ascii(vec![geo.longitude_ref().as_bytes().to_vec()]),
        );
        self.set(
            Tag::GPSLongitude,
            Value::Rational(deg_to_dms_rational(geo.longitude).to_vec()),
        );
        self.set(Tag::GPSAltitudeRef, Value::Byte(vec![geo.altitude_ref()]));
        self.set(
            Tag::GPSAltitude,
            Value::Rational(vec![find_rational(
                geo.altitude.abs(),
                ALTITUDE_MAX_DENOMINATOR,
            )]),
        );
    }

    /// Set DateTimeOriginal and DateTimeDigitized.
    pub fn set_dates(&mut self, original: &NaiveDateTime, digitized: &NaiveDateTime) {
        let ascii = |dt: &NaiveDateTime| {
            Value::Ascii(vec![dt.format(EXIF_DATE_FORMAT).to_string().into_bytes()])
        };
        self.set(Tag::DateTimeOriginal, ascii(original));
        self.set(Tag::DateTimeDigitized, ascii(digitized));
    }

    pub fn date_time_original(&self) -> Option<NaiveDateTime> {
        let field = self.get(Tag::DateTimeOriginal)?;
        parse_exif_datetime(&field.display_value().to_string())
    }

    pub fn date_time_digitized(&self) -> Option<NaiveDateTime> {
        let field = self.get(Tag::DateTimeDigitized)?;
        parse_exif_datetime(&field.display_value().to_string())
    }

    /// Encode the fields as a TIFF-structured EXIF block.
    pub fn dump(&self) -> Result<Vec<u8>, ExifError> {
        let mut writer = Writer::new();
        for field in &self.fields {
            writer.push_field(field);
        }
        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, false).map_err(ExifError::Encode)?;
        Ok(buf.into_inner())
    }
}

/// Embed an EXIF block into an image, replacing any EXIF it already carries.
pub fn insert(exif: Vec<u8>, image: Vec<u8>, kind: ImageKind) -> Result<Vec<u8>, ExifError> {
    let exif = Bytes::from(exif);
    let container_err = |e: img_parts::Error| ExifError::Container {
        kind,
        message: e.to_string(),
    };

    let bytes = match kind {
        ImageKind::Jpeg => {
            let mut jpeg = Jpeg::from_bytes(Bytes::from(image)).map_err(container_err)?;
            jpeg.set_exif(Some(exif));
            jpeg.encoder().bytes()
        }
        ImageKind::Png => {
            let mut png = Png::from_bytes(Bytes::from(image)).map_err(container_err)?;
            png.set_exif(Some(exif));
            png.encoder().bytes()
        }
    };
    Ok(bytes.to_vec())
}

/// Load, modify, dump and re-embed the EXIF block of an in-memory image.
pub fn rewrite<F>(image: Vec<u8>, kind: ImageKind, edit: F) -> Result<Vec<u8>, ExifError>
where
    F: FnOnce(&mut ExifTags),
{
    let mut tags = ExifTags::load(&image)?;
    edit(&mut tags);
    let exif = tags.dump()?;
    insert(exif, image, kind)
}

pub fn write_gps(image: Vec<u8>, kind: ImageKind, geo: &GeoData) -> Result<Vec<u8>, ExifError> {
    rewrite(image, kind, |tags| tags.set_gps(geo))
}

pub fn write_dates(
    image: Vec<u8>,
    kind: ImageKind,
    original: &NaiveDateTime,
    digitized: &NaiveDateTime,
) -> Result<Vec<u8>, ExifError> {
    rewrite(image, kind, |tags| tags.set_dates(original, digitized))
}

/// One EXIF field rendered for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDump {
    pub ifd: String,
    pub tag: String,
    pub value: String,
}

/// Every EXIF field of an image, thumbnail directory included.
pub fn describe(image: &[u8]) -> Result<Vec<FieldDump>, ExifError> {
    let exif = match Reader::new().read_from_container(&mut Cursor::new(image)) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(exif
        .fields()
        .map(|f| FieldDump {
            ifd: f.ifd_num.to_string(),
            tag: f.tag.to_string(),
            value: f.display_value().with_unit(&exif).to_string(),
        })
        .collect())
}

fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let cleaned = s.trim_matches('"').replace(['-', '/', '\\', '.'], ":");
    NaiveDateTime::parse_from_str(&cleaned, EXIF_DATE_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use exif::Rational;

    fn tiny_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 100, 50]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Jpeg)
            .unwrap();
        buf.into_inner()
    }

    fn read_back(bytes: &[u8]) -> exif::Exif {
        Reader::new()
            .read_from_container(&mut Cursor::new(bytes))
            .unwrap()
    }

    #[test]
    fn test_image_kind() {
        assert_eq!(ImageKind::from_extension("JPG"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_extension("jpeg"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_extension("png"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_extension("gif"), None);
        assert_eq!(ImageKind::from_path(Path::new("a/b.mp4")), None);
    }

    #[test]
    fn test_load_without_exif_is_empty() {
        let tags = ExifTags::load(&tiny_jpeg()).unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn test_write_gps_into_plain_jpeg() {
        let geo = GeoData::new(10.5, 20.5, 5.0);
        let out = write_gps(tiny_jpeg(), ImageKind::Jpeg, &geo).unwrap();
        let exif = read_back(&out);

        let lat_ref = exif.get_field(Tag::GPSLatitudeRef, In::PRIMARY).unwrap();
        assert!(matches!(&lat_ref.value, Value::Ascii(v) if v[0] == b"N"));
        let lon_ref = exif.get_field(Tag::GPSLongitudeRef, In::PRIMARY).unwrap();
        assert!(matches!(&lon_ref.value, Value::Ascii(v) if v[0] == b"E"));
        let alt_ref = exif.get_field(Tag::GPSAltitudeRef, In::PRIMARY).unwrap();
        assert_eq!(alt_ref.value.get_uint(0), Some(0));

        let lat = exif.get_field(Tag::GPSLatitude, In::PRIMARY).unwrap();
        match &lat.value {
            Value::Rational(v) => {
                let deg = crate::geo::dms_to_deg(v).unwrap();
                assert!((deg - 10.5).abs() < 1e-6);
            }
            other => panic!("unexpected latitude value {:?}", other),
        }
        let alt = exif.get_field(Tag::GPSAltitude, In::PRIMARY).unwrap();
        match &alt.value {
            Value::Rational(v) => assert_eq!(v[0].to_f64(), 5.0),
            other => panic!("unexpected altitude value {:?}", other),
        }
    }

    #[test]
    fn test_gps_replaces_existing_gps_and_keeps_other_tags() {
        let date = NaiveDate::from_ymd_opt(2020, 9, 13)
            .unwrap()
            .and_hms_opt(14, 26, 40)
            .unwrap();
        let dated = write_dates(tiny_jpeg(), ImageKind::Jpeg, &date, &date).unwrap();
        let first = write_gps(dated, ImageKind::Jpeg, &GeoData::new(1.0, 1.0, 1.0)).unwrap();
        let second = write_gps(first, ImageKind::Jpeg, &GeoData::new(-2.0, -3.0, -4.0)).unwrap();

        let tags = ExifTags::load(&second).unwrap();
        assert_eq!(tags.date_time_original(), Some(date));
        assert_eq!(
            tags.fields()
                .iter()
                .filter(|f| f.tag == Tag::GPSLatitudeRef)
                .count(),
            1
        );
        let lat_ref = tags.get(Tag::GPSLatitudeRef).unwrap();
        assert!(matches!(&lat_ref.value, Value::Ascii(v) if v[0] == b"S"));
        let alt_ref = tags.get(Tag::GPSAltitudeRef).unwrap();
        assert_eq!(alt_ref.value.get_uint(0), Some(1));
    }

    #[test]
    fn test_write_dates_sets_original_and_digitized() {
        let original = NaiveDate::from_ymd_opt(2019, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let out = write_dates(tiny_jpeg(), ImageKind::Jpeg, &original, &original).unwrap();
        let exif = read_back(&out);

        for tag in [Tag::DateTimeOriginal, Tag::DateTimeDigitized] {
            let field = exif.get_field(tag, In::PRIMARY).unwrap();
            assert!(matches!(&field.value, Value::Ascii(v) if v[0] == b"2019:01:02 03:04:05"));
        }
    }

    #[test]
    fn test_describe_lists_gps_fields() {
        assert!(describe(&tiny_jpeg()).unwrap().is_empty());

        let out = write_gps(tiny_jpeg(), ImageKind::Jpeg, &GeoData::new(1.0, 2.0, 3.0)).unwrap();
        let dump = describe(&out).unwrap();
        assert!(dump.iter().any(|f| f.tag == "GPSLatitudeRef" && f.ifd == "primary"));
    }

    #[test]
    fn test_insert_rejects_non_jpeg() {
        let err = insert(vec![], b"not an image".to_vec(), ImageKind::Jpeg).unwrap_err();
        assert!(matches!(err, ExifError::Container { .. }));
    }

    #[test]
    fn test_set_replaces_same_tag() {
        let mut tags = ExifTags::default();
        tags.set(Tag::GPSAltitude, Value::Rational(vec![Rational { num: 1, denom: 1 }]));
        tags.set(Tag::GPSAltitude, Value::Rational(vec![Rational { num: 2, denom: 1 }]));
        assert_eq!(tags.fields().len(), 1);
    }

    #[test]
    fn test_parse_exif_datetime() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(parse_exif_datetime("2020:01:02 03:04:05"), Some(expected));
        assert_eq!(parse_exif_datetime("2020-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_exif_datetime("garbage"), None);
    }
}

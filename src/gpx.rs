//! GPX track/route reader and writer
//!
//! # Usage
//!
//! [`GpxReader`] is an iterator over the tracks, track names, segments and
//! points of a GPX document, in document order. Routes are treated like
//! single-segment tracks. Waypoints and metadata are ignored.
//!
//! Most callers want [`read_track`], which decodes a whole file and flattens
//! every point of every track and route into one sequence, or
//! [`write_track`], which serializes a point sequence back into a GPX 1.1
//! document with a single track.

use std::borrow::Cow;
use std::fs;
use std::io::{BufRead, Write};
use std::num::ParseFloatError;
use std::path::Path;
use std::{mem, str};

use quick_xml::Writer;
use quick_xml::escape::unescape;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::reader::Reader;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::measure::{Degrees, Meters};
use crate::types::{GeoPoint, TypeError};

/// An error processing a GPX track file.
#[derive(Error, Debug)]
pub enum GpxError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("XML processing error")]
    Xml(#[from] quick_xml::Error),
    #[error("XML attribute processing error")]
    XmlAttr(#[from] AttrError),
    #[error("UTF-8 decoding error")]
    Utf8(#[from] str::Utf8Error),
    #[error("parsing floating-point number")]
    ParseFloat(#[from] ParseFloatError),
    #[error("GPX schema error")]
    GpxSchema(String),
    #[error("type invariant error")]
    Type(#[from] TypeError),
}

type Result<T> = std::result::Result<T, GpxError>;

/// An item parsed from a GPX document.
#[derive(Clone, PartialEq, Debug)]
pub enum GpxItem {
    /// Start of a `trk` or `rte` element.
    Track,
    /// The name of the enclosing track or route.
    TrackName(String),
    /// Start of a track segment.
    TrackSegment,
    /// A track or route point, in order along its track.
    TrackPoint(GeoPoint),
}

#[derive(Default)]
struct NextPtFields {
    lat: Option<Degrees<f64>>,
    lon: Option<Degrees<f64>>,
    ele: Option<Meters<f64>>,
}

impl TryFrom<NextPtFields> for GeoPoint {
    type Error = GpxError;

    fn try_from(value: NextPtFields) -> Result<Self> {
        let lat = value.lat.ok_or(GpxError::GpxSchema(
            "trackpoint missing lat attribute".to_owned(),
        ))?;
        let lon = value.lon.ok_or(GpxError::GpxSchema(
            "trackpoint missing lon attribute".to_owned(),
        ))?;
        Ok(GeoPoint::new(lat, lon, value.ele)?)
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
enum Tag {
    Gpx,
    Trk,
    Name,
    Trkseg,
    Trkpt,
    Rte,
    Rtept,
    Ele,
    Unknown,
}

fn get_tag(name: &[u8]) -> Tag {
    match name {
        b"gpx" => Tag::Gpx,
        b"trk" => Tag::Trk,
        b"trkseg" => Tag::Trkseg,
        b"trkpt" => Tag::Trkpt,
        b"rte" => Tag::Rte,
        b"rtept" => Tag::Rtept,
        b"ele" => Tag::Ele,
        b"name" => Tag::Name,
        _ => Tag::Unknown,
    }
}

type TagPath = Vec<Tag>;

fn is_name_path(path: &[Tag]) -> bool {
    matches!(path, [Tag::Gpx, Tag::Trk, Tag::Name] | [Tag::Gpx, Tag::Rte, Tag::Name])
}

fn is_point_path(path: &[Tag]) -> bool {
    matches!(
        path,
        [Tag::Gpx, Tag::Trk, Tag::Trkseg, Tag::Trkpt] | [Tag::Gpx, Tag::Rte, Tag::Rtept]
    )
}

fn is_ele_path(path: &[Tag]) -> bool {
    matches!(
        path,
        [Tag::Gpx, Tag::Trk, Tag::Trkseg, Tag::Trkpt, Tag::Ele]
            | [Tag::Gpx, Tag::Rte, Tag::Rtept, Tag::Ele]
    )
}

/// A streaming reader for GPX documents.
pub struct GpxReader<R>
where
    R: BufRead,
{
    reader: Reader<R>,
    tag_path: TagPath,
    next_pt_fields: NextPtFields,
    // Names may arrive split across text and entity reference events.
    name_buf: String,
    ele_buf: String,
    num_points: usize,
}

impl<R: BufRead> GpxReader<R> {
    pub fn from_reader(reader: R) -> GpxReader<R> {
        let mut reader = Reader::from_reader(reader);
        // The tag path stack relies on every start having a matching end,
        // which self-closing trkpt tags would otherwise break.
        reader.config_mut().expand_empty_elements = true;

        Self {
            reader,
            tag_path: vec![],
            next_pt_fields: NextPtFields::default(),
            name_buf: String::new(),
            ele_buf: String::new(),
            num_points: 0,
        }
    }

    fn read_point_attributes(&mut self, elt: &BytesStart) -> Result<()> {
        for attr in elt.attributes() {
            let a = attr?;
            let value = || -> Result<f64> { Ok(str::from_utf8(&a.value)?.trim().parse::<f64>()?) };
            if a.key == QName(b"lat") {
                self.next_pt_fields.lat = Some(Degrees(value()?));
            } else if a.key == QName(b"lon") {
                self.next_pt_fields.lon = Some(Degrees(value()?));
            }
        }
        Ok(())
    }
}

impl<R> Iterator for GpxReader<R>
where
    R: BufRead,
{
    type Item = Result<GpxItem>;

    fn next(&mut self) -> Option<Result<GpxItem>> {
        let mut buf = Vec::new();

        loop {
            match self.reader.read_event_into(&mut buf) {
                Err(err) => return Some(Err(GpxError::Xml(err))),

                Ok(Event::Eof) => {
                    debug!("GpxReader finished after {} points", self.num_points);
                    return None;
                }

                Ok(Event::Start(elt)) => {
                    self.tag_path.push(get_tag(elt.local_name().as_ref()));

                    let path = self.tag_path.as_slice();
                    if matches!(path, [Tag::Gpx, Tag::Trk] | [Tag::Gpx, Tag::Rte]) {
                        return Some(Ok(GpxItem::Track));
                    } else if matches!(path, [Tag::Gpx, Tag::Trk, Tag::Trkseg]) {
                        return Some(Ok(GpxItem::TrackSegment));
                    } else if is_point_path(path) {
                        if let Err(e) = self.read_point_attributes(&elt) {
                            return Some(Err(e));
                        }
                    } else if is_name_path(path) {
                        self.name_buf.clear();
                    } else if is_ele_path(path) {
                        self.ele_buf.clear();
                    }
                }

                Ok(Event::Text(text)) => {
                    let path = self.tag_path.as_slice();
                    if is_name_path(path) || is_ele_path(path) {
                        let s = match str::from_utf8(text.as_ref()) {
                            Ok(s) => s,
                            Err(err) => return Some(Err(err.into())),
                        };
                        if is_name_path(path) {
                            self.name_buf.push_str(s);
                        } else {
                            self.ele_buf.push_str(s);
                        }
                    }
                }

                Ok(Event::GeneralRef(entity)) => {
                    // Kept escaped and resolved together with the rest of
                    // the name when the element closes.
                    if is_name_path(&self.tag_path) {
                        match str::from_utf8(entity.as_ref()) {
                            Ok(s) => {
                                self.name_buf.push('&');
                                self.name_buf.push_str(s);
                                self.name_buf.push(';');
                            }
                            Err(err) => return Some(Err(err.into())),
                        }
                    }
                }

                Ok(Event::End(_elt)) => {
                    let tag_path = self.tag_path.clone();
                    self.tag_path.pop();

                    match tag_path.as_slice() {
                        path if is_point_path(path) => {
                            self.num_points += 1;
                            return Some(
                                GeoPoint::try_from(mem::take(&mut self.next_pt_fields))
                                    .map(GpxItem::TrackPoint),
                            );
                        }
                        path if is_ele_path(path) => {
                            let text = self.ele_buf.trim();
                            // An empty <ele/> leaves the point without elevation.
                            if !text.is_empty() {
                                match text.parse::<f64>() {
                                    Ok(ele) => self.next_pt_fields.ele = Some(Meters(ele)),
                                    Err(err) => return Some(Err(err.into())),
                                }
                            }
                        }
                        path if is_name_path(path) => {
                            return Some(match unescape(self.name_buf.trim()) {
                                Ok(name) => Ok(GpxItem::TrackName(name.into_owned())),
                                Err(err) => Err(GpxError::GpxSchema(format!(
                                    "invalid track name: {err}"
                                ))),
                            });
                        }
                        _ => (),
                    }
                }

                _ => (),
            }
            buf.clear();
        }
    }
}

/// The flattened contents of one GPX file.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct ParsedTrack {
    /// Name of the first track or route that has one.
    pub name: Option<String>,
    /// Every point of every track segment and route, in file order.
    pub points: Vec<GeoPoint>,
}

/// Turn raw file bytes into text the XML reader can consume.
///
/// A UTF-8 byte order mark and any leading whitespace before the XML
/// declaration are dropped. Bytes that are not valid UTF-8 are decoded as
/// Latin-1, which every byte sequence is.
pub fn decode_document(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s.trim_start()),
        Err(_) => {
            debug!("Document is not valid UTF-8, decoding as Latin-1");
            let s: String = bytes.iter().map(|&b| b as char).collect();
            Cow::Owned(s.trim_start().to_owned())
        }
    }
}

/// Parse a GPX document held in memory.
pub fn parse_track(bytes: &[u8]) -> Result<ParsedTrack> {
    let text = decode_document(bytes);
    let mut parsed = ParsedTrack::default();
    for item in GpxReader::from_reader(text.as_bytes()) {
        match item? {
            GpxItem::TrackName(name) if parsed.name.is_none() && !name.is_empty() => {
                parsed.name = Some(name);
            }
            GpxItem::TrackPoint(p) => parsed.points.push(p),
            _ => (),
        }
    }
    Ok(parsed)
}

/// Read and parse a GPX file from disk.
#[instrument(level = "trace", skip_all)]
pub fn read_track(path: &Path) -> Result<ParsedTrack> {
    let bytes = fs::read(path)?;
    parse_track(&bytes)
}

/// Write `points` as a GPX 1.1 document containing a single named track.
pub fn write_track<W: Write>(out: W, name: &str, points: &[GeoPoint]) -> Result<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("gpx").with_attributes([
        ("version", "1.1"),
        ("creator", "tourstitch"),
        ("xmlns", "http://www.topografix.com/GPX/1/1"),
    ])))?;
    writer.write_event(Event::Start(BytesStart::new("trk")))?;
    writer.write_event(Event::Start(BytesStart::new("name")))?;
    writer.write_event(Event::Text(BytesText::new(name)))?;
    writer.write_event(Event::End(BytesEnd::new("name")))?;
    writer.write_event(Event::Start(BytesStart::new("trkseg")))?;

    for p in points {
        let lat = p.lat().0.to_string();
        let lon = p.lon().0.to_string();
        let trkpt = BytesStart::new("trkpt")
            .with_attributes([("lat", lat.as_str()), ("lon", lon.as_str())]);
        match p.ele() {
            Some(ele) => {
                writer.write_event(Event::Start(trkpt))?;
                writer.write_event(Event::Start(BytesStart::new("ele")))?;
                let ele = ele.0.to_string();
                writer.write_event(Event::Text(BytesText::new(&ele)))?;
                writer.write_event(Event::End(BytesEnd::new("ele")))?;
                writer.write_event(Event::End(BytesEnd::new("trkpt")))?;
            }
            None => writer.write_event(Event::Empty(trkpt))?,
        }
    }

    writer.write_event(Event::End(BytesEnd::new("trkseg")))?;
    writer.write_event(Event::End(BytesEnd::new("trk")))?;
    writer.write_event(Event::End(BytesEnd::new("gpx")))?;
    writer.into_inner().flush()?;
    Ok(())
}

//! DIDL-Lite metadata as sent by control points

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use thiserror::Error;

use crate::mpd::{AudioResource, Track};

#[derive(Debug, Error)]
pub enum DidlError {
    #[error("invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("invalid escaped metadata: {0}")]
    Escape(#[from] quick_xml::escape::EscapeError),
    #[error("no item or container in metadata")]
    NoItem,
}

/// Undo one level of XML escaping when the document arrived escaped
/// (`&lt;DIDL-Lite ...`).
pub fn unquote(metadata: &str) -> Result<Cow<'_, str>, DidlError> {
    let trimmed = metadata.trim_start();
    if trimmed.starts_with("&lt;") {
        Ok(quick_xml::escape::unescape(metadata)?)
    } else {
        Ok(Cow::Borrowed(metadata))
    }
}

/// Parse the first item (or container) of a DIDL-Lite document.
pub fn parse_track(metadata: &str) -> Result<Track, DidlError> {
    let xml = unquote(metadata)?;
    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text(true);

    let mut track = Track::default();
    let mut in_object = false;
    let mut current: Option<Vec<u8>> = None;
    let mut seen_object = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"item" | b"container" if !seen_object => {
                        in_object = true;
                        seen_object = true;
                        track.id = None;
                    }
                    b"res" if in_object => {
                        read_res_attributes(&e, &mut track)?;
                    }
                    _ => {}
                }
                current = Some(name);
            }
            Event::Empty(e) => {
                if in_object && e.local_name().as_ref() == b"res" {
                    read_res_attributes(&e, &mut track)?;
                }
            }
            Event::Text(t) if in_object => {
                let text = t.unescape()?;
                let field = match current.as_deref() {
                    Some(b"title") => &mut track.title,
                    Some(b"artist") | Some(b"creator") if track.artist.is_empty() => {
                        &mut track.artist
                    }
                    Some(b"album") => &mut track.album,
                    Some(b"genre") => &mut track.genre,
                    Some(b"originalTrackNumber") => &mut track.track_number,
                    Some(b"res") if track.uri.is_empty() => &mut track.uri,
                    _ => continue,
                };
                *field = text.into_owned();
            }
            Event::End(e) => {
                if matches!(e.local_name().as_ref(), b"item" | b"container") {
                    in_object = false;
                }
                current = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_object {
        return Err(DidlError::NoItem);
    }
    Ok(track)
}

fn read_res_attributes(e: &BytesStart<'_>, track: &mut Track) -> Result<(), DidlError> {
    // Only the first resource describes the track
    if track.resource != AudioResource::default() || track.duration_secs != 0 {
        return Ok(());
    }
    for attr in e.attributes().flatten() {
        let value = attr.unescape_value()?;
        match attr.key.local_name().as_ref() {
            b"duration" => track.duration_secs = parse_duration(&value).unwrap_or(0),
            // DIDL bitrate is in bytes per second
            b"bitrate" => {
                track.resource.bitrate = value.parse::<u32>().unwrap_or(0).saturating_mul(8)
            }
            b"sampleFrequency" => track.resource.sample_rate = value.parse().unwrap_or(0),
            b"bitsPerSample" => track.resource.bits_per_sample = value.parse().unwrap_or(0),
            b"nrAudioChannels" => track.resource.channels = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    Ok(())
}

/// Single-item DIDL-Lite document describing a broadcast stream.
pub fn broadcast_item(id: u32, title: &str, uri: &str, art_uri: Option<&str>) -> String {
    let art = art_uri
        .map(|art| format!("<upnp:albumArtURI>{}</upnp:albumArtURI>", escape(art)))
        .unwrap_or_default();
    format!(
        concat!(
            r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" "#,
            r#"xmlns:dc="http://purl.org/dc/elements/1.1/" "#,
            r#"xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">"#,
            r#"<item id="{}" parentID="0" restricted="1">"#,
            "<dc:title>{}</dc:title>{}",
            "<upnp:class>object.item.audioItem.audioBroadcast</upnp:class>",
            r#"<res protocolInfo="http-get:*:*:*">{}</res>"#,
            "</item></DIDL-Lite>"
        ),
        id,
        escape(title),
        art,
        escape(uri)
    )
}

/// `H+:MM:SS[.F+]` to whole seconds
fn parse_duration(value: &str) -> Option<u32> {
    let mut secs = 0f64;
    for part in value.split(':') {
        secs = secs * 60.0 + part.parse::<f64>().ok()?;
    }
    Some(secs as u32)
}

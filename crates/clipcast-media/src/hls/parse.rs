//! Reading encoder-produced media playlists.

use crate::{Error, Result};

/// A media playlist as written by the encoder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPlaylist {
    /// `#EXT-X-TARGETDURATION`, if present.
    pub target_duration: Option<u32>,
    /// `#EXT-X-MEDIA-SEQUENCE` (0 when absent).
    pub media_sequence: u64,
    /// URI of the `#EXT-X-MAP` initialization section, if any.
    pub map_uri: Option<String>,
    /// Segments in playlist order.
    pub segments: Vec<ParsedSegment>,
    /// Whether `#EXT-X-ENDLIST` was seen.
    pub ended: bool,
}

/// One `#EXTINF` + URI pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSegment {
    pub duration: f64,
    pub uri: String,
}

/// Parse an M3U8 media playlist.
///
/// Only the tags the engine relies on are interpreted; anything else is
/// skipped. A second `#EXT-X-MAP` replaces the first, matching how the encoder
/// rewrites its init section on restarts.
pub fn parse_media_playlist(text: &str) -> Result<ParsedPlaylist> {
    let mut lines = text.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));

    match lines.find(|(_, l)| !l.is_empty()) {
        Some((_, "#EXTM3U")) => {}
        _ => return Err(Error::MissingHeader),
    }

    let mut playlist = ParsedPlaylist::default();
    let mut pending: Option<(usize, f64)> = None;

    for (line_no, line) in lines {
        if line.is_empty() {
            continue;
        }

        if let Some(value) = line.strip_prefix("#EXTINF:") {
            if let Some((prev_line, _)) = pending {
                return Err(Error::DanglingSegment(prev_line));
            }
            let raw = value.split(',').next().unwrap_or_default().trim();
            let duration = raw.parse::<f64>().map_err(|_| Error::InvalidTag {
                tag: "EXTINF",
                line: line_no,
                value: raw.to_string(),
            })?;
            if !duration.is_finite() || duration < 0.0 {
                return Err(Error::InvalidTag {
                    tag: "EXTINF",
                    line: line_no,
                    value: raw.to_string(),
                });
            }
            pending = Some((line_no, duration));
        } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            let target = value.trim().parse::<u32>().map_err(|_| Error::InvalidTag {
                tag: "EXT-X-TARGETDURATION",
                line: line_no,
                value: value.to_string(),
            })?;
            playlist.target_duration = Some(target);
        } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            playlist.media_sequence =
                value.trim().parse::<u64>().map_err(|_| Error::InvalidTag {
                    tag: "EXT-X-MEDIA-SEQUENCE",
                    line: line_no,
                    value: value.to_string(),
                })?;
        } else if let Some(attrs) = line.strip_prefix("#EXT-X-MAP:") {
            let uri = attribute(attrs, "URI").ok_or_else(|| Error::InvalidTag {
                tag: "EXT-X-MAP",
                line: line_no,
                value: attrs.to_string(),
            })?;
            playlist.map_uri = Some(uri.to_string());
        } else if line == "#EXT-X-ENDLIST" {
            playlist.ended = true;
        } else if line.starts_with('#') {
            continue;
        } else if let Some((_, duration)) = pending.take() {
            playlist.segments.push(ParsedSegment {
                duration,
                uri: line.to_string(),
            });
        }
    }

    if let Some((line_no, _)) = pending {
        return Err(Error::DanglingSegment(line_no));
    }

    Ok(playlist)
}

/// Rewrite every URI in a playlist: plain segment lines and the `URI="..."`
/// attribute of `#EXT-X-MAP`. Everything else is passed through unchanged.
pub fn rewrite_uris<F>(text: &str, mut rewrite: F) -> String
where
    F: FnMut(&str) -> String,
{
    let mut out = String::with_capacity(text.len() * 2);

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push('\n');
            continue;
        }

        if let Some(attrs) = trimmed.strip_prefix("#EXT-X-MAP:") {
            match attribute(attrs, "URI") {
                Some(uri) => {
                    let replaced = attrs.replacen(
                        &format!("URI=\"{}\"", uri),
                        &format!("URI=\"{}\"", rewrite(uri)),
                        1,
                    );
                    out.push_str("#EXT-X-MAP:");
                    out.push_str(&replaced);
                }
                None => out.push_str(trimmed),
            }
        } else if trimmed.starts_with('#') {
            out.push_str(trimmed);
        } else {
            out.push_str(&rewrite(trimmed));
        }
        out.push('\n');
    }

    out
}

/// Extract a quoted attribute value from an attribute list.
fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let key = format!("{}=\"", name);
    let start = attrs.find(&key)? + key.len();
    let len = attrs[start..].find('"')?;
    Some(&attrs[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCODER_OUTPUT: &str = "#EXTM3U
#EXT-X-VERSION:7
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:12
#EXT-X-MAP:URI=\"init.mp4\"
#EXTINF:6.006000,
segment-000012.m4s
#EXTINF:5.005000,
segment-000013.m4s
";

    #[test]
    fn test_parse_live_output() {
        let parsed = parse_media_playlist(ENCODER_OUTPUT).unwrap();
        assert_eq!(parsed.target_duration, Some(6));
        assert_eq!(parsed.media_sequence, 12);
        assert_eq!(parsed.map_uri.as_deref(), Some("init.mp4"));
        assert_eq!(parsed.segments.len(), 2);
        assert_eq!(parsed.segments[1].uri, "segment-000013.m4s");
        assert!((parsed.segments[0].duration - 6.006).abs() < 1e-9);
        assert!(!parsed.ended);
    }

    #[test]
    fn test_parse_rejects_missing_header() {
        assert_eq!(
            parse_media_playlist("#EXTINF:6,\na.ts\n"),
            Err(Error::MissingHeader)
        );
        assert_eq!(parse_media_playlist(""), Err(Error::MissingHeader));
    }

    #[test]
    fn test_parse_rejects_truncated_segment() {
        let text = "#EXTM3U\n#EXTINF:6.0,\nsegment-000000.ts\n#EXTINF:6.0,\n";
        assert_eq!(parse_media_playlist(text), Err(Error::DanglingSegment(4)));
    }

    #[test]
    fn test_parse_rejects_bad_duration() {
        let text = "#EXTM3U\n#EXTINF:abc,\nsegment-000000.ts\n";
        assert!(matches!(
            parse_media_playlist(text),
            Err(Error::InvalidTag { tag: "EXTINF", .. })
        ));
    }

    #[test]
    fn test_parse_endlist() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:4.0,\nsegment-000000.ts\n#EXT-X-ENDLIST\n";
        let parsed = parse_media_playlist(text).unwrap();
        assert!(parsed.ended);
        assert!(parsed.map_uri.is_none());
    }

    #[test]
    fn test_rewrite_uris() {
        let rewritten = rewrite_uris(ENCODER_OUTPUT, |uri| format!("https://host/hls/{}?token=t", uri));
        assert!(rewritten.contains("#EXT-X-MAP:URI=\"https://host/hls/init.mp4?token=t\""));
        assert!(rewritten.contains("\nhttps://host/hls/segment-000013.m4s?token=t\n"));
        assert!(rewritten.contains("#EXT-X-MEDIA-SEQUENCE:12"));
    }
}

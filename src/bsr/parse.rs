//! Parses the textual Bootstrap Record format back into the typed model,
//! the reverse of [`crate::bsr::synth`].
//!
//! Keys are matched case-insensitively, values are taken verbatim.
//! `use_fast_rejection`/`use_positioning` are never read off the wire --
//! [`crate::bsr::model::BsrEntry::supports_fast_rejection`] and
//! `supports_positioning` recompute them from whatever constraint lists
//! actually parsed, never trusting any hint embedded in the file itself.

use tracing::warn;

use crate::bsr::model::{BsrEntry, JobIdRange, Range, Stream, Volume, VolSessionTime};
use crate::error::{Error, Result};

/// Parse a full BSR document into one [`BsrEntry`] per blank-line-separated
/// block.
pub fn parse(text: &str) -> Result<Vec<BsrEntry>> {
    let mut entries = Vec::new();
    let mut current: Option<BsrEntry> = None;
    let mut volume_names: Vec<String> = Vec::new();
    let mut media_types: Vec<String> = Vec::new();
    let mut devices: Vec<String> = Vec::new();
    let mut slots: Vec<String> = Vec::new();

    let flush = |current: &mut Option<BsrEntry>,
                 volume_names: &mut Vec<String>,
                 media_types: &mut Vec<String>,
                 devices: &mut Vec<String>,
                 slots: &mut Vec<String>,
                 out: &mut Vec<BsrEntry>| {
        if let Some(mut e) = current.take() {
            for (i, name) in volume_names.iter().enumerate() {
                e.volumes.push(Volume {
                    name: name.clone(),
                    media_type: media_types.get(i).cloned().unwrap_or_default(),
                    device: devices.get(i).cloned().unwrap_or_default(),
                    slot: slots.get(i).and_then(|s| s.parse().ok()),
                });
            }
            volume_names.clear();
            media_types.clear();
            devices.clear();
            slots.clear();
            if let Some(job_id) = e.job_ids.first().map(|r| r.start) {
                for f in &mut e.findex {
                    f.job_id = job_id;
                }
            }
            out.push(e);
        }
    };

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            flush(&mut current, &mut volume_names, &mut media_types, &mut devices, &mut slots, &mut entries);
            continue;
        }

        let Some(eq) = line.find('=') else {
            return Err(Error::Corrupt(format!("malformed BSR line: {line:?}")));
        };
        let key = &line[..eq];
        let value = &line[eq + 1..];
        let entry = current.get_or_insert_with(BsrEntry::new);

        match key.to_ascii_lowercase().as_str() {
            "volume" => volume_names = split_list(value),
            "mediatype" => media_types = split_list(value),
            "device" => devices = split_list(value),
            "slot" => slots = split_list(value),
            "client" => entry.clients.push(crate::bsr::model::Client(value.to_string())),
            "job" => entry.jobs.push(crate::bsr::model::Job(value.to_string())),
            "jobid" => match parse_range_u32(value) {
                Some(r) => entry.job_ids.push(r),
                None => return Err(Error::Corrupt(format!("bad JobId value {value:?}"))),
            },
            "count" => entry.count = value.parse().ok(),
            "fileindex" => match parse_range_i32(value) {
                // `job_id` is filled in by `flush` once the entry's JobId
                // line (emitted after FileIndex, see `synth::render_entry`)
                // has been seen.
                Some(r) => entry.findex.push(crate::bsr::model::FindexRange {
                    job_id: 0,
                    range: r,
                    all: false,
                }),
                None => return Err(Error::Corrupt(format!("bad FileIndex value {value:?}"))),
            },
            "jobtype" => entry.job_type = Some(value.to_string()),
            "joblevel" => entry.job_level = Some(value.to_string()),
            "volsessionid" => match parse_range_u32(value) {
                Some(r) => entry.vol_session_ids.push(r),
                None => return Err(Error::Corrupt(format!("bad VolSessionId value {value:?}"))),
            },
            "volsessiontime" => match value.parse() {
                Ok(t) => entry.vol_session_times.push(VolSessionTime(t)),
                Err(_) => return Err(Error::Corrupt(format!("bad VolSessionTime value {value:?}"))),
            },
            "volfile" => match parse_range_u32(value) {
                Some(r) => entry.vol_files.push(r),
                None => return Err(Error::Corrupt(format!("bad VolFile value {value:?}"))),
            },
            "volblock" => match parse_range_u32(value) {
                Some(r) => entry.vol_blocks.push(r),
                None => return Err(Error::Corrupt(format!("bad VolBlock value {value:?}"))),
            },
            "voladdr" => match parse_range_u64(value) {
                Some(r) => entry.vol_addrs.push(r),
                None => return Err(Error::Corrupt(format!("bad VolAddr value {value:?}"))),
            },
            "stream" => match parse_stream(value) {
                Some(s) => entry.streams.push(s),
                None => warn!(value, "unrecognized Stream value"),
            },
            "fileregex" => entry.file_regex = Some(value.to_string()),
            "include" => entry.include = !matches!(value.to_ascii_lowercase().as_str(), "no" | "0" | "false"),
            "exclude" => entry.include = matches!(value.to_ascii_lowercase().as_str(), "no" | "0" | "false"),
            _ => {
                warn!(key, value, "unknown BSR key, storing verbatim");
                entry.unknown.push((key.to_string(), value.to_string()));
            }
        }
    }

    flush(&mut current, &mut volume_names, &mut media_types, &mut devices, &mut slots, &mut entries);
    Ok(entries)
}

fn split_list(value: &str) -> Vec<String> {
    value.split('|').map(|s| s.to_string()).collect()
}

fn parse_stream(value: &str) -> Option<Stream> {
    Some(match value {
        "Data" => Stream::Data,
        "Attributes" => Stream::Attributes,
        "Resource" => Stream::Resource,
        "Acl" => Stream::Acl,
        "Xattr" => Stream::Xattr,
        _ => return None,
    })
}

fn parse_range_u32(s: &str) -> Option<Range<u32>> {
    parse_range(s)
}

fn parse_range_u64(s: &str) -> Option<Range<u64>> {
    parse_range(s)
}

fn parse_range_i32(s: &str) -> Option<Range<i32>> {
    parse_range(s)
}

fn parse_range<T>(s: &str) -> Option<Range<T>>
where
    T: std::str::FromStr + Copy + Ord,
{
    if let Some(idx) = s.find('-') {
        if idx > 0 {
            let (a, b) = s.split_at(idx);
            let b = &b[1..];
            if let (Ok(a), Ok(b)) = (a.parse::<T>(), b.parse::<T>()) {
                return Some(Range { start: a, end: b });
            }
        }
    }
    s.parse::<T>().ok().map(Range::single)
}

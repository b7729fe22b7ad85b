//! Minimal reader for Android binary XML, just enough to pull the
//! `package`, `versionCode` and `versionName` attributes off `<manifest>`.

use anyhow::{Context, Result, anyhow, bail};

use super::ApkId;

const RES_XML_TYPE: u16 = 0x0003;
const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;

const UTF8_FLAG: u32 = 1 << 8;
const NO_INDEX: u32 = 0xffff_ffff;

const TYPE_STRING: u8 = 0x03;
const TYPE_INT_DEC: u8 = 0x10;
const TYPE_INT_HEX: u8 = 0x11;

// android:versionCode / android:versionName resource ids.
const ATTR_VERSION_CODE: u32 = 0x0101_021b;
const ATTR_VERSION_NAME: u32 = 0x0101_021c;

pub(super) fn manifest_id(data: &[u8]) -> Result<ApkId> {
    if u16_at(data, 0)? != RES_XML_TYPE {
        bail!("not a binary XML document");
    }
    let mut off = u16_at(data, 2)? as usize;
    let mut strings: Vec<String> = Vec::new();
    let mut resource_ids: Vec<u32> = Vec::new();

    while off + 8 <= data.len() {
        let chunk_type = u16_at(data, off)?;
        let header_size = u16_at(data, off + 2)? as usize;
        let chunk_size = u32_at(data, off + 4)? as usize;
        if chunk_size < 8 || off + chunk_size > data.len() {
            bail!("malformed chunk at offset {}", off);
        }
        let chunk = &data[off..off + chunk_size];

        match chunk_type {
            RES_STRING_POOL_TYPE => strings = string_pool(chunk).context("read string pool")?,
            RES_XML_RESOURCE_MAP_TYPE => {
                resource_ids = (header_size..chunk_size)
                    .step_by(4)
                    .map(|o| u32_at(chunk, o))
                    .collect::<Result<_>>()?;
            }
            RES_XML_START_ELEMENT_TYPE => {
                let name = u32_at(chunk, header_size + 4)?;
                if lookup(&strings, name) != Some("manifest") {
                    bail!("root element is not <manifest>");
                }
                return manifest_attributes(chunk, header_size, &strings, &resource_ids);
            }
            _ => {}
        }
        off += chunk_size;
    }
    bail!("no <manifest> element")
}

fn manifest_attributes(
    chunk: &[u8],
    header_size: usize,
    strings: &[String],
    resource_ids: &[u32],
) -> Result<ApkId> {
    let attr_start = u16_at(chunk, header_size + 8)? as usize;
    let attr_size = u16_at(chunk, header_size + 10)? as usize;
    let attr_count = u16_at(chunk, header_size + 12)? as usize;
    if attr_size < 20 {
        bail!("attribute records too small ({} bytes)", attr_size);
    }

    let mut app_id = None;
    let mut version_code = None;
    let mut version_name = None;

    for i in 0..attr_count {
        let at = header_size + attr_start + i * attr_size;
        let name_idx = u32_at(chunk, at + 4)?;
        let raw = u32_at(chunk, at + 8)?;
        let data_type = *chunk
            .get(at + 15)
            .ok_or_else(|| anyhow!("truncated attribute {}", i))?;
        let data = u32_at(chunk, at + 16)?;

        let name = lookup(strings, name_idx).unwrap_or_default();
        let res_id = resource_ids.get(name_idx as usize).copied();
        let string_value = || {
            if raw != NO_INDEX {
                lookup(strings, raw).map(str::to_string)
            } else if data_type == TYPE_STRING {
                lookup(strings, data).map(str::to_string)
            } else {
                None
            }
        };

        if name == "package" && res_id.is_none() {
            app_id = string_value();
        } else if name == "versionCode" || res_id == Some(ATTR_VERSION_CODE) {
            version_code = match data_type {
                TYPE_INT_DEC | TYPE_INT_HEX => Some(u64::from(data)),
                _ => string_value().and_then(|s| s.trim().parse().ok()),
            };
        } else if name == "versionName" || res_id == Some(ATTR_VERSION_NAME) {
            version_name = string_value();
        }
    }

    Ok(ApkId {
        app_id: app_id
            .filter(|s| !s.is_empty())
            .context("<manifest> has no package attribute")?,
        version_code: version_code.context("<manifest> has no versionCode")?,
        version_name,
    })
}

fn string_pool(chunk: &[u8]) -> Result<Vec<String>> {
    let header_size = u16_at(chunk, 2)? as usize;
    let count = u32_at(chunk, 8)? as usize;
    let flags = u32_at(chunk, 16)?;
    let strings_start = u32_at(chunk, 20)? as usize;
    let utf8 = flags & UTF8_FLAG != 0;

    (0..count)
        .map(|i| {
            let offset = u32_at(chunk, header_size + i * 4)? as usize;
            let at = strings_start + offset;
            if utf8 {
                utf8_string(chunk, at)
            } else {
                utf16_string(chunk, at)
            }
        })
        .collect()
}

fn utf8_string(chunk: &[u8], at: usize) -> Result<String> {
    // Character count, then byte count; each takes one or two bytes.
    let (_, skip) = utf8_length(chunk, at)?;
    let (len, skip2) = utf8_length(chunk, at + skip)?;
    let start = at + skip + skip2;
    let bytes = chunk
        .get(start..start + len)
        .ok_or_else(|| anyhow!("truncated string at offset {}", at))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn utf8_length(chunk: &[u8], at: usize) -> Result<(usize, usize)> {
    let b0 = *chunk
        .get(at)
        .ok_or_else(|| anyhow!("truncated string length at offset {}", at))?;
    if b0 & 0x80 == 0 {
        return Ok((b0 as usize, 1));
    }
    let b1 = *chunk
        .get(at + 1)
        .ok_or_else(|| anyhow!("truncated string length at offset {}", at))?;
    Ok(((((b0 & 0x7f) as usize) << 8) | b1 as usize, 2))
}

fn utf16_string(chunk: &[u8], at: usize) -> Result<String> {
    let first = u16_at(chunk, at)?;
    let (len, start) = if first & 0x8000 == 0 {
        (first as usize, at + 2)
    } else {
        let second = u16_at(chunk, at + 2)?;
        ((((first & 0x7fff) as usize) << 16) | second as usize, at + 4)
    };
    let units = (0..len)
        .map(|i| u16_at(chunk, start + i * 2))
        .collect::<Result<Vec<u16>>>()?;
    Ok(String::from_utf16_lossy(&units))
}

fn lookup(strings: &[String], idx: u32) -> Option<&str> {
    strings.get(idx as usize).map(String::as_str)
}

fn u16_at(buf: &[u8], off: usize) -> Result<u16> {
    buf.get(off..off + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| anyhow!("truncated binary XML at offset {}", off))
}

fn u32_at(buf: &[u8], off: usize) -> Result<u32> {
    buf.get(off..off + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| anyhow!("truncated binary XML at offset {}", off))
}

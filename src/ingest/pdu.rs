//! SMS-DELIVER PDU 解码（3GPP TS 23.040）
//!
//! 只处理终端接收方向的 SMS-DELIVER，支持：
//! - GSM 7-bit 默认字母表（含扩展表）、8-bit、UCS-2
//! - 数字号码（BCD）和字母数字发送者
//! - 用户数据头中的长短信拼接信息（8-bit / 16-bit 参考号）

use chrono::{DateTime, FixedOffset, Local, NaiveDate, TimeZone};
use thiserror::Error;

/// PDU 解码错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PduError {
    #[error("PDU truncated while reading {0}")]
    Truncated(&'static str),
    #[error("Unsupported message type indicator: {0}")]
    UnsupportedType(u8),
    #[error("Unsupported PDU format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid hex string")]
    InvalidHex,
}

/// 用户数据编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alphabet {
    Gsm7,
    EightBit,
    Ucs2,
}

/// 长短信分段信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatInfo {
    pub reference: u16,
    pub total: u8,
    pub sequence: u8,
}

/// 解码后的短信
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsPdu {
    /// 发送者（国际号码带 `+`）
    pub originating_address: String,
    /// 正文
    pub body: String,
    /// 服务中心时间戳
    pub service_center_time: Option<DateTime<FixedOffset>>,
    pub alphabet: Alphabet,
    pub concat: Option<ConcatInfo>,
}

impl SmsPdu {
    /// 服务中心时间戳（毫秒）
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.service_center_time.map(|t| t.timestamp_millis())
    }

    pub fn received_at(&self) -> Option<DateTime<Local>> {
        self.service_center_time.map(|t| t.with_timezone(&Local))
    }
}

const ESCAPE: u8 = 0x1B;

#[rustfmt::skip]
const GSM7_BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{A0}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

fn gsm7_extension(code: u8) -> Option<char> {
    Some(match code {
        0x0A => '\u{0C}',
        0x14 => '^',
        0x28 => '{',
        0x29 => '}',
        0x2F => '\\',
        0x3C => '[',
        0x3D => '~',
        0x3E => ']',
        0x40 => '|',
        0x65 => '€',
        _ => return None,
    })
}

/// 按字节顺序读取的游标
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self, what: &'static str) -> Result<u8, PduError> {
        let b = *self.data.get(self.pos).ok_or(PduError::Truncated(what))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], PduError> {
        let end = self.pos.checked_add(n).ok_or(PduError::Truncated(what))?;
        let slice = self.data.get(self.pos..end).ok_or(PduError::Truncated(what))?;
        self.pos = end;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

/// 唯一支持的 PDU 格式（GSM/UMTS）；CDMA 的 "3gpp2" 不支持
pub const FORMAT_3GPP: &str = "3gpp";

/// 解码一条 PDU；`format` 为广播附带的格式（"3gpp" / "3gpp2"），缺省按 3gpp
pub fn decode(pdu: &[u8], format: Option<&str>) -> Result<SmsPdu, PduError> {
    if let Some(f) = format {
        if !f.eq_ignore_ascii_case(FORMAT_3GPP) {
            return Err(PduError::UnsupportedFormat(f.to_string()));
        }
    }

    let mut r = Reader::new(pdu);

    // SMSC 信息：长度字节 + 内容
    let smsc_len = r.byte("SMSC length")? as usize;
    r.take(smsc_len, "SMSC address")?;

    let first_octet = r.byte("first octet")?;
    let mti = first_octet & 0x03;
    if mti != 0x00 {
        return Err(PduError::UnsupportedType(mti));
    }
    let has_udh = first_octet & 0x40 != 0;

    let originating_address = decode_address(&mut r)?;
    let _pid = r.byte("protocol identifier")?;
    let dcs = r.byte("data coding scheme")?;
    let alphabet = alphabet_for(dcs);
    let scts = r.take(7, "service centre timestamp")?;
    let service_center_time = decode_timestamp(scts);

    let udl = r.byte("user data length")? as usize;
    let user_data = r.rest();

    let (body, concat) = decode_user_data(user_data, udl, alphabet, has_udh)?;

    Ok(SmsPdu {
        originating_address,
        body,
        service_center_time,
        alphabet,
        concat,
    })
}

/// 解码十六进制字符串形式的 PDU
pub fn decode_hex_pdu(hex: &str, format: Option<&str>) -> Result<SmsPdu, PduError> {
    decode(&decode_hex(hex)?, format)
}

/// 十六进制字符串转字节
pub fn decode_hex(hex: &str) -> Result<Vec<u8>, PduError> {
    let hex: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if hex.len() % 2 != 0 {
        return Err(PduError::InvalidHex);
    }
    hex.chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).map_err(|_| PduError::InvalidHex)?;
            u8::from_str_radix(s, 16).map_err(|_| PduError::InvalidHex)
        })
        .collect()
}

fn decode_address(r: &mut Reader<'_>) -> Result<String, PduError> {
    let digits = r.byte("address length")? as usize;
    let toa = r.byte("address type")?;
    let bytes = r.take(digits.div_ceil(2), "address")?;
    let type_of_number = (toa >> 4) & 0x07;

    // 字母数字发送者（如运营商/服务名称）
    if type_of_number == 0x05 {
        let septets = digits * 4 / 7;
        return Ok(gsm7_to_string(&unpack_septets(bytes, septets)));
    }

    let mut out = String::with_capacity(digits + 1);
    if type_of_number == 0x01 {
        out.push('+');
    }
    for b in bytes {
        for nibble in [b & 0x0F, b >> 4] {
            match nibble {
                0..=9 => out.push((b'0' + nibble) as char),
                0x0A => out.push('*'),
                0x0B => out.push('#'),
                0x0C => out.push('a'),
                0x0D => out.push('b'),
                0x0E => out.push('c'),
                _ => {} // 0xF 填充
            }
        }
    }
    Ok(out)
}

fn alphabet_for(dcs: u8) -> Alphabet {
    match dcs & 0xF0 {
        0x00..=0x30 => match (dcs >> 2) & 0x03 {
            0x01 => Alphabet::EightBit,
            0x02 => Alphabet::Ucs2,
            _ => Alphabet::Gsm7,
        },
        0xC0 | 0xD0 => Alphabet::Gsm7,
        0xE0 => Alphabet::Ucs2,
        0xF0 => {
            if dcs & 0x04 != 0 {
                Alphabet::EightBit
            } else {
                Alphabet::Gsm7
            }
        }
        _ => Alphabet::Gsm7,
    }
}

fn swapped_decimal(b: u8) -> u32 {
    ((b & 0x0F) as u32) * 10 + (b >> 4) as u32
}

fn decode_timestamp(scts: &[u8]) -> Option<DateTime<FixedOffset>> {
    let yy = swapped_decimal(scts[0]) as i32;
    let year = if yy >= 90 { 1900 + yy } else { 2000 + yy };
    let month = swapped_decimal(scts[1]);
    let day = swapped_decimal(scts[2]);
    let hour = swapped_decimal(scts[3]);
    let minute = swapped_decimal(scts[4]);
    let second = swapped_decimal(scts[5]);

    let tz = scts[6];
    let quarters = ((tz & 0x07) as i32) * 10 + (tz >> 4) as i32;
    let offset_secs = quarters * 15 * 60;
    let offset = if tz & 0x08 != 0 {
        FixedOffset::west_opt(offset_secs)?
    } else {
        FixedOffset::east_opt(offset_secs)?
    };

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    offset.from_local_datetime(&naive).single()
}

fn decode_user_data(
    data: &[u8],
    udl: usize,
    alphabet: Alphabet,
    has_udh: bool,
) -> Result<(String, Option<ConcatInfo>), PduError> {
    let (header_len, concat) = if has_udh {
        let udhl = *data.first().ok_or(PduError::Truncated("user data header"))? as usize;
        let header = data
            .get(1..1 + udhl)
            .ok_or(PduError::Truncated("user data header"))?;
        (udhl + 1, parse_concat(header))
    } else {
        (0, None)
    };

    let body = match alphabet {
        Alphabet::Gsm7 => {
            let octets = (udl * 7).div_ceil(8);
            let bytes = data.get(..octets).ok_or(PduError::Truncated("user data"))?;
            let septets = unpack_septets(bytes, udl);
            // 用户数据头按 septet 边界对齐（含填充位）
            let skip = (header_len * 8).div_ceil(7);
            gsm7_to_string(septets.get(skip..).unwrap_or(&[]))
        }
        Alphabet::Ucs2 => {
            let bytes = data.get(header_len..udl).ok_or(PduError::Truncated("user data"))?;
            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
        Alphabet::EightBit => {
            let bytes = data.get(header_len..udl).ok_or(PduError::Truncated("user data"))?;
            String::from_utf8_lossy(bytes).into_owned()
        }
    };

    Ok((body, concat))
}

fn parse_concat(header: &[u8]) -> Option<ConcatInfo> {
    let mut i = 0;
    while i + 1 < header.len() {
        let iei = header[i];
        let len = header[i + 1] as usize;
        let value = header.get(i + 2..i + 2 + len)?;
        match (iei, len) {
            (0x00, 3) => {
                return Some(ConcatInfo {
                    reference: value[0] as u16,
                    total: value[1],
                    sequence: value[2],
                })
            }
            (0x08, 4) => {
                return Some(ConcatInfo {
                    reference: u16::from_be_bytes([value[0], value[1]]),
                    total: value[2],
                    sequence: value[3],
                })
            }
            _ => {}
        }
        i += 2 + len;
    }
    None
}

/// 拆出 7-bit 打包的 septet
fn unpack_septets(bytes: &[u8], count: usize) -> Vec<u8> {
    (0..count)
        .filter_map(|i| {
            let bit = i * 7;
            let idx = bit / 8;
            let shift = bit % 8;
            let lo = *bytes.get(idx)? as u16 >> shift;
            let hi = if shift > 1 {
                (*bytes.get(idx + 1).unwrap_or(&0) as u16) << (8 - shift)
            } else {
                0
            };
            Some(((lo | hi) & 0x7F) as u8)
        })
        .collect()
}

fn gsm7_to_string(septets: &[u8]) -> String {
    let mut out = String::with_capacity(septets.len());
    let mut iter = septets.iter();
    while let Some(&code) = iter.next() {
        if code == ESCAPE {
            match iter.next() {
                Some(&next) => out.push(gsm7_extension(next).unwrap_or(GSM7_BASIC[next as usize])),
                None => break,
            }
        } else {
            out.push(GSM7_BASIC[code as usize]);
        }
    }
    out
}

use bytes::Bytes;
use dlg_core::{
    DiskLogError, FRAME_HEADER_SIZE, MAX_MESSAGE_SIZE, RECORD_SEPARATOR, Result,
};

/// One decoded `(log name, message)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub log_name: String,
    pub message: Bytes,
}

impl Record {
    pub fn new(log_name: impl Into<String>, message: impl Into<Bytes>) -> Self {
        Self {
            log_name: log_name.into(),
            message: message.into(),
        }
    }
}

/// Read the declared body length from the front of `buf`.
#[inline]
fn declared_length(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Try to decode one record from the front of `buf`.
///
/// Returns `Ok(None)` while the frame is still incomplete, or the record
/// together with the number of bytes it occupied. An oversized length or a
/// body without separator is an error; the caller is expected to drop the
/// connection since the stream can no longer be resynchronised.
pub fn parse_record(buf: &[u8]) -> Result<Option<(Record, usize)>> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let declared = declared_length(buf);
    let body_len = declared as usize;
    if body_len > MAX_MESSAGE_SIZE {
        return Err(DiskLogError::FrameTooLarge {
            declared,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let total_len = FRAME_HEADER_SIZE + body_len;
    if buf.len() < total_len {
        return Ok(None);
    }

    let body = &buf[FRAME_HEADER_SIZE..total_len];
    let cut = body
        .iter()
        .position(|&b| b == RECORD_SEPARATOR)
        .ok_or(DiskLogError::MissingSeparator)?;

    let log_name =
        std::str::from_utf8(&body[..cut]).map_err(|_| DiskLogError::LogNameEncoding)?;
    if log_name.is_empty() {
        return Err(DiskLogError::EmptyLogName);
    }

    let record = Record {
        log_name: log_name.to_owned(),
        message: Bytes::copy_from_slice(&body[cut + 1..]),
    };

    Ok(Some((record, total_len)))
}

/// Encode a record as `u32_be(len(body)) || body`.
pub fn encode_record(log_name: &str, message: &[u8]) -> Result<Vec<u8>> {
    if log_name.is_empty() {
        return Err(DiskLogError::EmptyLogName);
    }
    if log_name.as_bytes().contains(&RECORD_SEPARATOR) {
        return Err(DiskLogError::InvalidLogName(log_name.to_owned()));
    }

    let body_len = log_name.len() + 1 + message.len();
    if body_len > MAX_MESSAGE_SIZE {
        return Err(DiskLogError::FrameTooLarge {
            declared: u32::try_from(body_len).unwrap_or(u32::MAX),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + body_len);
    // body_len <= MAX_MESSAGE_SIZE, so the cast is lossless
    buf.extend_from_slice(&(body_len as u32).to_be_bytes());
    buf.extend_from_slice(log_name.as_bytes());
    buf.push(RECORD_SEPARATOR);
    buf.extend_from_slice(message);

    Ok(buf)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn decode_all(buf: &[u8]) -> Vec<Record> {
        let mut records = Vec::new();
        let mut offset = 0;
        while let Some((record, used)) = parse_record(&buf[offset..]).unwrap() {
            records.push(record);
            offset += used;
        }
        records
    }

    #[test]
    fn test_parse_simple_record() {
        let mut wire = vec![0x00, 0x00, 0x00, 0x09];
        wire.extend_from_slice(b"app\tHi\n");
        // declared 9 but body is 7 bytes: still incomplete
        assert!(parse_record(&wire).unwrap().is_none());

        let wire = encode_record("app", b"Hi\n").unwrap();
        assert_eq!(&wire[..4], &[0x00, 0x00, 0x00, 0x07]);

        let (record, used) = parse_record(&wire).unwrap().unwrap();
        assert_eq!(used, wire.len());
        assert_eq!(record.log_name, "app");
        assert_eq!(&record.message[..], b"Hi\n");
    }

    #[test]
    fn test_partial_header_and_body() {
        let wire = encode_record("app", b"hello").unwrap();

        for cut in 0..wire.len() {
            assert!(
                parse_record(&wire[..cut]).unwrap().is_none(),
                "prefix of {} bytes should be incomplete",
                cut
            );
        }
    }

    #[test]
    fn test_only_first_tab_separates() {
        let wire = encode_record("metrics", b"a\tb\tc").unwrap();
        let (record, _) = parse_record(&wire).unwrap().unwrap();

        assert_eq!(record.log_name, "metrics");
        assert_eq!(&record.message[..], b"a\tb\tc");
    }

    #[test]
    fn test_empty_message_is_valid() {
        let wire = encode_record("app", b"").unwrap();
        let (record, used) = parse_record(&wire).unwrap().unwrap();

        assert_eq!(used, 8);
        assert!(record.message.is_empty());
    }

    #[test]
    fn test_oversized_length_rejected_before_body_arrives() {
        let wire = [0x00, 0x04, 0x00, 0x00];
        let err = parse_record(&wire).unwrap_err();

        assert!(matches!(
            err,
            DiskLogError::FrameTooLarge {
                declared: 0x0004_0000,
                ..
            }
        ));
        assert!(err.is_malformed_frame());
    }

    #[test]
    fn test_maximum_size_accepted() {
        let message = vec![b'x'; MAX_MESSAGE_SIZE - 4];
        let wire = encode_record("big", &message).unwrap();
        let (record, used) = parse_record(&wire).unwrap().unwrap();

        assert_eq!(used, FRAME_HEADER_SIZE + MAX_MESSAGE_SIZE);
        assert_eq!(record.message.len(), MAX_MESSAGE_SIZE - 4);

        let too_big = vec![b'x'; MAX_MESSAGE_SIZE - 3];
        assert!(encode_record("big", &too_big).is_err());
    }

    #[test]
    fn test_missing_separator_rejected() {
        let mut wire = 7u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"nodelim");

        let err = parse_record(&wire).unwrap_err();
        assert!(matches!(err, DiskLogError::MissingSeparator));
    }

    #[test]
    fn test_empty_log_name_rejected() {
        let mut wire = 3u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"\tHi");

        let err = parse_record(&wire).unwrap_err();
        assert!(matches!(err, DiskLogError::EmptyLogName));
    }

    #[test]
    fn test_non_utf8_message_preserved() {
        let message = [0xff, 0xfe, b'\n'];
        let wire = encode_record("bin", &message).unwrap();
        let (record, _) = parse_record(&wire).unwrap().unwrap();

        assert_eq!(&record.message[..], &message);
    }

    #[test]
    fn test_encode_rejects_tab_in_log_name() {
        assert!(encode_record("a\tb", b"x").is_err());
        assert!(encode_record("", b"x").is_err());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut wire = encode_record("a", b"one").unwrap();
        wire.extend(encode_record("b", b"two").unwrap());
        wire.extend(encode_record("a", b"three").unwrap());

        let records = decode_all(&wire);
        assert_eq!(
            records,
            vec![
                Record::new("a", &b"one"[..]),
                Record::new("b", &b"two"[..]),
                Record::new("a", &b"three"[..]),
            ]
        );
    }
}

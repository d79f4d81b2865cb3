use std::net::IpAddr;

use crate::mdnsd_error::MdnsdError;

pub const HEADER_LEN: usize = 12;

pub const FLAGS_QR_MASK: u16 = 0x8000;
pub const FLAGS_QR_RESPONSE: u16 = 0x8000;
pub const FLAGS_AUTHORITATIVE_RESPONSE: u16 = 0x8400;
pub const FLAGS_RCODE_MASK: u16 = 0x000f;
pub const RCODE_NAME_ERROR: u16 = 0x0003;

pub const TYPE_A: u16 = 0x0001;
pub const TYPE_AAAA: u16 = 0x001c;
pub const CLASS_IN: u16 = 0x0001;
pub const CLASS_CACHE_FLUSH: u16 = 0x8000;
pub const ANSWER_TTL: u32 = 240;

const MAX_LABEL_OCTETS: usize = 63;

// Longest host name (64) plus ".local" and the separators.
pub const MAX_NAME_LEN: usize = 72;

const LOCAL_SUFFIX: &str = ".local";

// Read position inside a received datagram. Every read is checked against the
// end of the slice it was created from.
pub struct Cursor<'a>
{
    buffer: &'a [u8],
    offset: usize
}

impl<'a> Cursor<'a>
{
    pub fn new(buffer: &'a [u8]) -> Cursor<'a>
    {
        Cursor
        {
            buffer,
            offset: 0
        }
    }

    pub fn at(buffer: &'a [u8], offset: usize) -> Cursor<'a>
    {
        Cursor
        {
            buffer,
            offset
        }
    }

    pub fn offset(&self) -> usize
    {
        self.offset
    }

    pub fn remaining(&self) -> usize
    {
        self.buffer.len().saturating_sub(self.offset)
    }

    pub fn read_u8(&mut self) -> Result<u8, MdnsdError>
    {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, MdnsdError>
    {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], MdnsdError>
    {
        if len > self.remaining()
        {
            return Err(MdnsdError::OutOfBounds);
        }

        let bytes = &self.buffer[self.offset..self.offset + len];
        self.offset += len;

        Ok(bytes)
    }

    // Bytes consumed since `start`, which must be an earlier offset of this cursor.
    fn consumed_since(&self, start: usize) -> &'a [u8]
    {
        &self.buffer[start..self.offset]
    }
}

// Decodes an uncompressed label sequence into a lowercase dotted name. Returns
// the name together with its verbatim wire bytes, terminator included.
pub fn decode_name<'a>(cursor: &mut Cursor<'a>) -> Result<(String, &'a [u8]), MdnsdError>
{
    let start = cursor.offset();
    let mut name: Vec<u8> = Vec::new();

    loop
    {
        let label_len = cursor.read_u8()? as usize;
        if label_len == 0
        {
            break;
        }

        // Also rejects compression pointers (0xc0) and the reserved 0x40/0x80 forms.
        if label_len > MAX_LABEL_OCTETS
        {
            return Err(MdnsdError::LabelInvalid);
        }

        let separator = if name.is_empty() { 0 } else { 1 };
        if name.len() + separator + label_len >= MAX_NAME_LEN
        {
            return Err(MdnsdError::NameToLong);
        }

        let label = cursor.read_bytes(label_len)?;
        if separator == 1
        {
            name.push(b'.');
        }

        name.extend(label.iter().map(|c| c.to_ascii_lowercase()));
    }

    let wire = cursor.consumed_since(start);

    Ok((String::from_utf8_lossy(&name).into_owned(), wire))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsHeader
{
    pub id: u16,
    pub flags: u16,
    pub questions_len: u16,
    pub answers_len: u16,
    pub authorities_len: u16,
    pub additional_len: u16
}

impl DnsHeader
{
    pub fn from(buffer: &[u8]) -> Result<DnsHeader, MdnsdError>
    {
        if buffer.len() < HEADER_LEN
        {
            return Err(MdnsdError::HeaderToShort);
        }

        let mut cursor = Cursor::new(buffer);

        Ok(DnsHeader
        {
            id: cursor.read_u16()?,
            flags: cursor.read_u16()?,
            questions_len: cursor.read_u16()?,
            answers_len: cursor.read_u16()?,
            authorities_len: cursor.read_u16()?,
            additional_len: cursor.read_u16()?
        })
    }

    pub fn is_response(&self) -> bool
    {
        self.flags & FLAGS_QR_MASK == FLAGS_QR_RESPONSE
    }

    pub fn to_bytes(&self) -> Vec<u8>
    {
        let mut buffer = Vec::with_capacity(HEADER_LEN);

        buffer.extend_from_slice(&self.id.to_be_bytes());
        buffer.extend_from_slice(&self.flags.to_be_bytes());
        buffer.extend_from_slice(&self.questions_len.to_be_bytes());
        buffer.extend_from_slice(&self.answers_len.to_be_bytes());
        buffer.extend_from_slice(&self.authorities_len.to_be_bytes());
        buffer.extend_from_slice(&self.additional_len.to_be_bytes());

        buffer
    }
}

#[derive(Debug)]
pub struct Question<'a>
{
    pub name: String,
    pub wire_name: &'a [u8],
    pub qtype: u16,
    pub qclass: u16
}

impl Question<'_>
{
    pub fn is_local(&self) -> bool
    {
        self.name.len() > LOCAL_SUFFIX.len() && self.name.ends_with(LOCAL_SUFFIX)
    }

    // First label of the name, empty for a name without any dot.
    pub fn host_label(&self) -> &str
    {
        match self.name.find('.')
        {
            Some(dot) => &self.name[..dot],
            None => ""
        }
    }
}

#[derive(Debug)]
pub struct QueryMessage<'a>
{
    pub header: DnsHeader,
    pub questions: Vec<Question<'a>>
}

impl<'a> QueryMessage<'a>
{
    pub fn parse(datagram: &'a [u8]) -> Result<QueryMessage<'a>, MdnsdError>
    {
        let header = DnsHeader::from(datagram)?;

        // Replies to other responders are never consumed here.
        if header.is_response()
        {
            return Err(MdnsdError::NotQuery);
        }

        let mut cursor = Cursor::at(datagram, HEADER_LEN);
        let mut questions = Vec::new();

        for _ in 0..header.questions_len
        {
            let (name, wire_name) = decode_name(&mut cursor)?;
            let qtype = cursor.read_u16()?;
            let qclass = cursor.read_u16()?;

            questions.push(Question
            {
                name,
                wire_name,
                qtype,
                qclass
            });
        }

        Ok(QueryMessage
        {
            header,
            questions
        })
    }
}

// Single-answer authoritative reply. The name is copied down verbatim from the
// question, which is always the name being answered.
pub fn build_answer(id: u16, wire_name: &[u8], address: IpAddr) -> Vec<u8>
{
    let header = DnsHeader
    {
        id,
        flags: FLAGS_AUTHORITATIVE_RESPONSE,
        questions_len: 0,
        answers_len: 1,
        authorities_len: 0,
        additional_len: 0
    };

    let (record_type, data) = match address
    {
        IpAddr::V4(v4) => (TYPE_A, v4.octets().to_vec()),
        IpAddr::V6(v6) => (TYPE_AAAA, v6.octets().to_vec())
    };

    let mut buffer = header.to_bytes();
    buffer.extend_from_slice(wire_name);
    buffer.extend_from_slice(&record_type.to_be_bytes());
    buffer.extend_from_slice(&(CLASS_CACHE_FLUSH | CLASS_IN).to_be_bytes());
    buffer.extend_from_slice(&ANSWER_TTL.to_be_bytes());
    buffer.extend_from_slice(&(data.len() as u16).to_be_bytes());
    buffer.extend_from_slice(&data);

    buffer
}

pub fn type_name(qtype: u16) -> &'static str
{
    match qtype
    {
        TYPE_A => "A",
        TYPE_AAAA => "AAAA",
        12 => "PTR",
        16 => "TXT",
        33 => "SRV",
        255 => "ANY",
        _ => "other"
    }
}

#[cfg(test)]
pub(crate) mod tests
{
    use super::*;
    use std::net::{ Ipv4Addr, Ipv6Addr };

    // Builds a query with one question per (name, type) pair.
    pub(crate) fn query(id: u16, questions: &[(&str, u16)]) -> Vec<u8>
    {
        let header = DnsHeader
        {
            id,
            flags: 0x0000,
            questions_len: questions.len() as u16,
            answers_len: 0,
            authorities_len: 0,
            additional_len: 0
        };

        let mut buffer = header.to_bytes();
        for (name, qtype) in questions
        {
            for label in name.split('.')
            {
                buffer.push(label.len() as u8);
                buffer.extend_from_slice(label.as_bytes());
            }
            buffer.push(0x00);
            buffer.extend_from_slice(&qtype.to_be_bytes());
            buffer.extend_from_slice(&CLASS_IN.to_be_bytes());
        }

        buffer
    }

    #[test]
    fn test_decode_name_1()
    {
        let packet: [u8; 17] =
        [
            0x04, 0x5f, 0x68, 0x61, 0x70, 0x04, 0x5f, 0x74, 0x63, 0x70, 0x05, 0x6c, 0x6f, 0x63,
            0x61, 0x6c, 0x00,
        ];

        let mut cursor = Cursor::new(&packet);
        let (name, wire) = decode_name(&mut cursor).unwrap();

        assert_eq!(name, "_hap._tcp.local");
        assert_eq!(wire, &packet[..]);
        assert_eq!(cursor.offset(), 17);
    }

    #[test]
    fn test_decode_name_2()
    {
        let packet: [u8; 28] =
        [
            0x0f, 0x5f, 0x63, 0x6f, 0x6d, 0x70, 0x61, 0x6e, 0x69, 0x6f, 0x6e, 0x2d, 0x6c, 0x69,
            0x6e, 0x6b, 0x04, 0x5f, 0x74, 0x63, 0x70, 0x05, 0x6c, 0x6f, 0x63, 0x61, 0x6c, 0x00,
        ];

        let mut cursor = Cursor::new(&packet);
        let (name, _) = decode_name(&mut cursor).unwrap();

        assert_eq!(name, "_companion-link._tcp.local");
        assert_eq!(cursor.offset(), 28);
    }

    #[test]
    fn test_decode_name_lowercases()
    {
        let packet = [0x08, b'D', b'I', b'R', b'I', b'G', b'E', b'R', b'A', 0x05, b'L', b'o', b'c', b'a', b'L', 0x00];

        let mut cursor = Cursor::new(&packet);
        let (name, wire) = decode_name(&mut cursor).unwrap();

        assert_eq!(name, "dirigera.local");
        // Wire bytes keep the case they were sent with.
        assert_eq!(wire[1], b'D');
    }

    #[test]
    fn test_decode_name_rejects_pointer()
    {
        let packet = [0x04, b'h', b'o', b's', b't', 0xc0, 0x0c];

        let mut cursor = Cursor::new(&packet);
        assert!(matches!(decode_name(&mut cursor), Err(MdnsdError::LabelInvalid)));
    }

    #[test]
    fn test_decode_name_truncated()
    {
        // Label claims 10 bytes, only 3 follow.
        let packet = [0x0a, b'a', b'b', b'c'];
        let mut cursor = Cursor::new(&packet);
        assert!(matches!(decode_name(&mut cursor), Err(MdnsdError::OutOfBounds)));

        // Missing terminator.
        let packet = [0x03, b'a', b'b', b'c'];
        let mut cursor = Cursor::new(&packet);
        assert!(matches!(decode_name(&mut cursor), Err(MdnsdError::OutOfBounds)));
    }

    #[test]
    fn test_decode_name_too_long()
    {
        let mut packet = Vec::new();
        for _ in 0..2
        {
            packet.push(63);
            packet.extend_from_slice(&[b'x'; 63]);
        }
        packet.push(0);

        let mut cursor = Cursor::new(&packet);
        assert!(matches!(decode_name(&mut cursor), Err(MdnsdError::NameToLong)));
    }

    #[test]
    fn test_decode_name_longest_accepted()
    {
        // 63 + '.' + 5 = 69 characters, inside the limit.
        let mut packet = vec![63];
        packet.extend_from_slice(&[b'y'; 63]);
        packet.push(5);
        packet.extend_from_slice(b"local");
        packet.push(0);

        let mut cursor = Cursor::new(&packet);
        let (name, _) = decode_name(&mut cursor).unwrap();
        assert_eq!(name.len(), 69);
    }

    #[test]
    fn test_decode_name_never_reads_out_of_bounds()
    {
        let packet = query(0, &[("myhost.local", TYPE_A)]);

        // Every truncation and every single byte corruption either decodes to
        // a bounded name or fails cleanly.
        for end in 0..packet.len()
        {
            let mut cursor = Cursor::at(&packet[..end], HEADER_LEN);
            if let Ok((name, wire)) = decode_name(&mut cursor)
            {
                assert!(name.len() < MAX_NAME_LEN);
                assert!(wire.len() <= end);
            }
        }

        for position in HEADER_LEN..packet.len()
        {
            for value in [0x00, 0x01, 0x3f, 0x40, 0x7f, 0xc0, 0xff]
            {
                let mut corrupted = packet.clone();
                corrupted[position] = value;

                let mut cursor = Cursor::at(&corrupted, HEADER_LEN);
                if let Ok((name, _)) = decode_name(&mut cursor)
                {
                    assert!(name.len() < MAX_NAME_LEN);
                    assert!(cursor.offset() <= corrupted.len());
                }
            }
        }
    }

    #[test]
    fn test_cursor_past_end()
    {
        let packet = [0x01];
        let mut cursor = Cursor::at(&packet, 5);

        assert_eq!(cursor.remaining(), 0);
        assert!(matches!(cursor.read_u8(), Err(MdnsdError::OutOfBounds)));
    }

    #[test]
    fn test_header_to_bytes()
    {
        let header = DnsHeader
        {
            id: 0x1234,
            flags: 0x8400,
            questions_len: 0,
            answers_len: 1,
            authorities_len: 0,
            additional_len: 0
        };

        let buffer = header.to_bytes();

        assert_eq!(buffer, [0x12, 0x34, 0x84, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(DnsHeader::from(&buffer).unwrap(), header);
    }

    #[test]
    fn test_header_to_short()
    {
        assert!(matches!(DnsHeader::from(&[0u8; 11]), Err(MdnsdError::HeaderToShort)));
    }

    #[test]
    fn test_query_message_parse()
    {
        let packet = query(0x0042, &[("Printer.local", TYPE_A), ("example.com", TYPE_AAAA)]);
        let message = QueryMessage::parse(&packet).unwrap();

        assert_eq!(message.header.id, 0x0042);
        assert_eq!(message.questions.len(), 2);

        assert_eq!(message.questions[0].name, "printer.local");
        assert_eq!(message.questions[0].qtype, TYPE_A);
        assert_eq!(message.questions[0].qclass, CLASS_IN);
        assert!(message.questions[0].is_local());
        assert_eq!(message.questions[0].host_label(), "printer");

        assert_eq!(message.questions[1].name, "example.com");
        assert_eq!(message.questions[1].qtype, TYPE_AAAA);
        assert!(!message.questions[1].is_local());
    }

    #[test]
    fn test_query_message_rejects_response()
    {
        let mut packet = query(0, &[("host.local", TYPE_A)]);
        packet[2] = 0x84;

        assert!(matches!(QueryMessage::parse(&packet), Err(MdnsdError::NotQuery)));
    }

    #[test]
    fn test_query_message_missing_type()
    {
        let mut packet = query(0, &[("host.local", TYPE_A)]);
        packet.truncate(packet.len() - 3);

        assert!(matches!(QueryMessage::parse(&packet), Err(MdnsdError::OutOfBounds)));
    }

    #[test]
    fn test_query_message_more_questions_than_data()
    {
        let mut packet = query(0, &[("host.local", TYPE_A)]);
        packet[5] = 0x05;

        assert!(matches!(QueryMessage::parse(&packet), Err(MdnsdError::OutOfBounds)));
    }

    #[test]
    fn test_is_local()
    {
        let packet = query(0, &[("local", TYPE_A), ("a.localhost", TYPE_A), ("a.local", TYPE_A)]);
        let message = QueryMessage::parse(&packet).unwrap();

        assert!(!message.questions[0].is_local());
        assert!(!message.questions[1].is_local());
        assert!(message.questions[2].is_local());
    }

    #[test]
    fn test_build_a_answer()
    {
        let packet = query(0x1234, &[("host.local", TYPE_A)]);
        let message = QueryMessage::parse(&packet).unwrap();

        let answer = build_answer(0x1234, message.questions[0].wire_name, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)));

        let mut expected = vec![0x12, 0x34, 0x84, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
        expected.extend_from_slice(&[0x04, b'h', b'o', b's', b't', 0x05, b'l', b'o', b'c', b'a', b'l', 0x00]);
        expected.extend_from_slice(&[0x00, 0x01, 0x80, 0x01, 0x00, 0x00, 0x00, 0xf0, 0x00, 0x04, 192, 168, 1, 10]);

        assert_eq!(answer, expected);
    }

    #[test]
    fn test_build_aaaa_answer()
    {
        let packet = query(0, &[("host.local", TYPE_AAAA)]);
        let message = QueryMessage::parse(&packet).unwrap();
        let address = Ipv6Addr::new(0xfe80, 0, 0, 0, 0x1, 0x2, 0x3, 0x4);

        let answer = build_answer(0, message.questions[0].wire_name, IpAddr::V6(address));
        let tail = &answer[HEADER_LEN + message.questions[0].wire_name.len()..];

        assert_eq!(&tail[..10], &[0x00, 0x1c, 0x80, 0x01, 0x00, 0x00, 0x00, 0xf0, 0x00, 0x10]);
        assert_eq!(&tail[10..], &address.octets());
    }
}

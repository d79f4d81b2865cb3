use std::net::IpAddr;
use log::debug;

use crate::dns::{ self, QueryMessage, TYPE_A, TYPE_AAAA };
use crate::mdnsd_error::MdnsdError;
use crate::socket::PacketInfo;

// The single label this process answers for under ".local".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIdentity
{
    name: String
}

impl HostIdentity
{
    // Normalises raw host name text: first word, first label, lowercase.
    pub fn new(raw: &str) -> HostIdentity
    {
        let word = raw.split_whitespace().next().unwrap_or("");
        let label = word.split('.').next().unwrap_or("");

        HostIdentity
        {
            name: label.to_ascii_lowercase()
        }
    }

    pub fn as_str(&self) -> &str
    {
        &self.name
    }

    pub fn is_empty(&self) -> bool
    {
        self.name.is_empty()
    }

    pub fn matches(&self, label: &str) -> bool
    {
        !label.is_empty() && label == self.name
    }
}

#[derive(Debug, Default)]
pub struct Response
{
    pub answers: Vec<Vec<u8>>,
    pub question_types: Vec<u16>
}

impl Response
{
    pub fn is_empty(&self) -> bool
    {
        self.answers.is_empty()
    }
}

pub struct Responder
{
    ipv4_only: bool
}

impl Responder
{
    pub fn new(ipv4_only: bool) -> Responder
    {
        Responder
        {
            ipv4_only
        }
    }

    // Answers every question naming `identity`.local that has a usable
    // destination address. A decode error anywhere aborts the datagram before
    // any answer is built.
    pub fn respond(&self, identity: &HostIdentity, datagram: &[u8], info: &PacketInfo) -> Result<Response, MdnsdError>
    {
        let message = QueryMessage::parse(datagram)?;
        let mut response = Response::default();

        for question in &message.questions
        {
            response.question_types.push(question.qtype);

            if !question.is_local()
            {
                continue;
            }

            if !identity.matches(question.host_label())
            {
                debug!("Not answering {} {} (host is {})", dns::type_name(question.qtype), question.name, identity.as_str());
                continue;
            }

            match self.address_for(question.qtype, info)
            {
                Some(address) =>
                {
                    debug!("Answering {} {} with {}", dns::type_name(question.qtype), question.name, address);
                    response.answers.push(dns::build_answer(message.header.id, question.wire_name, address));
                },
                None => debug!("No usable address for {} {}", dns::type_name(question.qtype), question.name)
            }
        }

        Ok(response)
    }

    fn address_for(&self, qtype: u16, info: &PacketInfo) -> Option<IpAddr>
    {
        match qtype
        {
            TYPE_A => info.local_v4
                .filter(|addr| !addr.is_unspecified())
                .map(IpAddr::V4),
            TYPE_AAAA if !self.ipv4_only => info.local_v6
                .filter(|addr| !addr.is_unspecified() && !addr.is_multicast() && addr.to_ipv4_mapped().is_none())
                .map(IpAddr::V6),
            _ => None
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::net::{ Ipv4Addr, Ipv6Addr };
    use crate::dns::tests::query;

    fn info_v4(addr: Ipv4Addr) -> PacketInfo
    {
        PacketInfo
        {
            local_v4: Some(addr),
            local_v6: None,
            index: 2
        }
    }

    fn info_v6(addr: Ipv6Addr) -> PacketInfo
    {
        PacketInfo
        {
            local_v4: None,
            local_v6: Some(addr),
            index: 2
        }
    }

    #[test]
    fn test_host_identity_normalise()
    {
        assert_eq!(HostIdentity::new("MyHost\n").as_str(), "myhost");
        assert_eq!(HostIdentity::new("box.example.com").as_str(), "box");
        assert_eq!(HostIdentity::new("  spaced name").as_str(), "spaced");
        assert!(HostIdentity::new("\n").is_empty());
    }

    #[test]
    fn test_empty_identity_matches_nothing()
    {
        let identity = HostIdentity::new("");
        assert!(!identity.matches(""));
        assert!(!identity.matches("host"));
    }

    #[test]
    fn test_answer_a_query()
    {
        let responder = Responder::new(false);
        let identity = HostIdentity::new("host");
        let packet = query(0x1234, &[("host.local", TYPE_A)]);

        let response = responder.respond(&identity, &packet, &info_v4(Ipv4Addr::new(192, 168, 1, 10))).unwrap();

        let mut expected = vec![0x12, 0x34, 0x84, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00];
        expected.extend_from_slice(&[0x04, b'h', b'o', b's', b't', 0x05, b'l', b'o', b'c', b'a', b'l', 0x00]);
        expected.extend_from_slice(&[0x00, 0x01, 0x80, 0x01, 0x00, 0x00, 0x00, 0xf0, 0x00, 0x04, 192, 168, 1, 10]);

        assert_eq!(response.answers, vec![expected]);
        assert_eq!(response.question_types, vec![TYPE_A]);
    }

    #[test]
    fn test_answer_is_case_insensitive()
    {
        let responder = Responder::new(false);
        let identity = HostIdentity::new("Host");
        let packet = query(1, &[("HOST.Local", TYPE_A)]);

        let response = responder.respond(&identity, &packet, &info_v4(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        assert_eq!(response.answers.len(), 1);
    }

    #[test]
    fn test_answer_aaaa_query()
    {
        let responder = Responder::new(false);
        let identity = HostIdentity::new("host");
        let packet = query(7, &[("host.local", TYPE_AAAA)]);
        let address: Ipv6Addr = "fe80::1:2:3:4".parse().unwrap();

        let response = responder.respond(&identity, &packet, &info_v6(address)).unwrap();

        assert_eq!(response.answers.len(), 1);
        let answer = &response.answers[0];
        assert_eq!(&answer[answer.len() - 16..], &address.octets());
    }

    #[test]
    fn test_ipv4_only_ignores_aaaa()
    {
        let responder = Responder::new(true);
        let identity = HostIdentity::new("host");
        let packet = query(7, &[("host.local", TYPE_AAAA)]);

        let response = responder.respond(&identity, &packet, &info_v6("fe80::1".parse().unwrap())).unwrap();
        assert!(response.is_empty());
    }

    #[test]
    fn test_no_answer_without_destination()
    {
        let responder = Responder::new(false);
        let identity = HostIdentity::new("host");

        let packet = query(7, &[("host.local", TYPE_A)]);
        let response = responder.respond(&identity, &packet, &PacketInfo::default()).unwrap();
        assert!(response.is_empty());

        let response = responder.respond(&identity, &packet, &info_v4(Ipv4Addr::UNSPECIFIED)).unwrap();
        assert!(response.is_empty());

        // A multicast destination is not an address of ours.
        let packet = query(7, &[("host.local", TYPE_AAAA)]);
        let response = responder.respond(&identity, &packet, &info_v6("ff02::fb".parse().unwrap())).unwrap();
        assert!(response.is_empty());
    }

    #[test]
    fn test_no_aaaa_answer_from_mapped_destination()
    {
        let responder = Responder::new(false);
        let identity = HostIdentity::new("host");
        let packet = query(7, &[("host.local", TYPE_AAAA)]);

        for mapped in ["::ffff:224.0.0.251", "::ffff:192.168.1.10"]
        {
            let response = responder.respond(&identity, &packet, &info_v6(mapped.parse().unwrap())).unwrap();
            assert!(response.is_empty(), "{}", mapped);
        }
    }

    #[test]
    fn test_no_answer_for_other_names()
    {
        let responder = Responder::new(false);
        let identity = HostIdentity::new("host");
        let info = info_v4(Ipv4Addr::new(192, 168, 1, 10));

        for name in ["host.example.com", "other.local", "hostname.local", "host.localdomain"]
        {
            let packet = query(7, &[(name, TYPE_A)]);
            let response = responder.respond(&identity, &packet, &info).unwrap();
            assert!(response.is_empty(), "{}", name);
        }
    }

    #[test]
    fn test_unsupported_type_only_skips_that_question()
    {
        let responder = Responder::new(false);
        let identity = HostIdentity::new("host");
        let packet = query(7, &[("host.local", 16), ("host.local", TYPE_A)]);

        let response = responder.respond(&identity, &packet, &info_v4(Ipv4Addr::new(192, 168, 1, 10))).unwrap();

        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.question_types, vec![16, TYPE_A]);
    }

    #[test]
    fn test_zero_questions()
    {
        let responder = Responder::new(false);
        let identity = HostIdentity::new("host");
        let packet = query(7, &[]);

        let response = responder.respond(&identity, &packet, &info_v4(Ipv4Addr::new(192, 168, 1, 10))).unwrap();
        assert!(response.is_empty());
        assert!(response.question_types.is_empty());
    }

    #[test]
    fn test_decode_failure_gives_no_partial_answers()
    {
        let responder = Responder::new(false);
        let identity = HostIdentity::new("host");

        // First question is fine, the second one is cut short.
        let mut packet = query(7, &[("host.local", TYPE_A), ("host.local", TYPE_A)]);
        packet.truncate(packet.len() - 4);

        let result = responder.respond(&identity, &packet, &info_v4(Ipv4Addr::new(192, 168, 1, 10)));
        assert!(result.is_err());
    }

    #[test]
    fn test_responses_are_ignored()
    {
        let responder = Responder::new(false);
        let identity = HostIdentity::new("host");
        let mut packet = query(7, &[("host.local", TYPE_A)]);
        packet[2] = 0x84;

        let result = responder.respond(&identity, &packet, &info_v4(Ipv4Addr::new(192, 168, 1, 10)));
        assert!(matches!(result, Err(MdnsdError::NotQuery)));
    }

    #[test]
    fn test_identity_reload()
    {
        let responder = Responder::new(false);
        let info = info_v4(Ipv4Addr::new(192, 168, 1, 10));
        let alpha = query(1, &[("alpha.local", TYPE_A)]);
        let beta = query(2, &[("beta.local", TYPE_A)]);

        let mut identity = HostIdentity::new("alpha");
        assert_eq!(responder.respond(&identity, &alpha, &info).unwrap().answers.len(), 1);
        assert!(responder.respond(&identity, &beta, &info).unwrap().is_empty());

        identity = HostIdentity::new("beta\n");
        assert!(responder.respond(&identity, &alpha, &info).unwrap().is_empty());
        assert_eq!(responder.respond(&identity, &beta, &info).unwrap().answers.len(), 1);
    }
}

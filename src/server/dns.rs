//! DNS message handling for the forwarder
//!
//! Only what the forwarder needs: pull the queried name out of a query and
//! build a "0.0.0.0" answer for names on the deny list.

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{rdata::A, RData, Record};
use std::net::Ipv4Addr;
use tracing::trace;

/// TTL of synthesized answers (seconds)
pub const BLACK_HOLE_TTL: u32 = 1800;

/// Decode a packet that carries at least one question
fn parse_query(packet: &[u8]) -> Option<Message> {
    let message = match Message::from_vec(packet) {
        Ok(message) => message,
        Err(e) => {
            trace!("Undecodable DNS packet: {}", e);
            return None;
        }
    };
    if message.queries().is_empty() {
        return None;
    }
    Some(message)
}

/// Name asked by the first question, lowercased, without the trailing dot
pub fn extract_domain_name(packet: &[u8]) -> Option<String> {
    let message = parse_query(packet)?;
    let name = normalize_name(&message.queries()[0].name().to_ascii());
    if name.is_empty() {
        return None;
    }
    Some(name)
}

/// Answer the query with a single `A 0.0.0.0` record
pub fn respond_with_zero(query: &[u8]) -> Option<Vec<u8>> {
    let request = parse_query(query)?;
    let question = request.queries()[0].clone();

    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(ResponseCode::NoError);
    response.add_answer(Record::from_rdata(
        question.name().clone(),
        BLACK_HOLE_TTL,
        RData::A(A(Ipv4Addr::UNSPECIFIED)),
    ));
    response.add_query(question);

    response.to_vec().ok()
}

/// Normalize a configured deny-list entry the way queried names are
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
pub(crate) fn build_query(id: u16, name: &str) -> Vec<u8> {
    use hickory_proto::op::Query;
    use hickory_proto::rr::{Name, RecordType};

    let mut message = Message::new();
    message.set_id(id).set_recursion_desired(true);
    message.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
    message.to_vec().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain_name() {
        let query = build_query(0x1234, "WWW.Example.com");
        assert_eq!(extract_domain_name(&query).unwrap(), "www.example.com");
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(extract_domain_name(&[0u8; 5]).is_none());

        // Header claims a question but the label runs past the end
        let mut query = build_query(1, "example.com");
        query.truncate(16);
        assert!(extract_domain_name(&query).is_none());

        // No questions
        let mut message = Message::new();
        message.set_id(1);
        assert!(extract_domain_name(&message.to_vec().unwrap()).is_none());
    }

    #[test]
    fn test_respond_with_zero() {
        let query = build_query(0xBEEF, "ads.example.net");
        let answer = Message::from_vec(&respond_with_zero(&query).unwrap()).unwrap();

        assert_eq!(answer.id(), 0xBEEF);
        assert_eq!(answer.message_type(), MessageType::Response);
        assert_eq!(answer.response_code(), ResponseCode::NoError);
        assert!(answer.recursion_desired());
        assert!(answer.recursion_available());
        assert_eq!(answer.queries(), Message::from_vec(&query).unwrap().queries());

        assert_eq!(answer.answers().len(), 1);
        let record = &answer.answers()[0];
        assert_eq!(record.ttl(), BLACK_HOLE_TTL);
        assert_eq!(record.name().to_ascii(), "ads.example.net.");
        assert_eq!(record.data(), Some(&RData::A(A(Ipv4Addr::UNSPECIFIED))));
    }

    #[test]
    fn test_pointer_loop_is_rejected() {
        // One question whose name points at itself
        let mut query = build_query(7, "tracker.example");
        query.truncate(12);
        query.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1]);
        assert!(extract_domain_name(&query).is_none());
        assert!(respond_with_zero(&query).is_none());
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name(" Tracker.Example.COM. "), "tracker.example.com");
    }
}

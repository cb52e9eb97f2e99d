//! Helpers for computing the ROS message-definition md5sum used as the
//! compatibility key in the TCPROS connection header (see `ConnectionHeader::md5sum`).
//!
//! The full algorithm for turning a parsed `.msg`/`.srv` file into the "md5sum content"
//! text (flattening sub-message fields, stripping comments, substituting constants) lives
//! in the code generator, which is out of scope for this crate. What lands here is the
//! final, generator-agnostic step: hashing already-flattened definition text the same way
//! `rosmsg md5` does, so that hand-written `RosMessageType` impls (see `roslibrust_test_msgs`)
//! and the generator agree on the same digest for the same flattened text.

/// Computes the hex md5sum of already-flattened message definition text.
///
/// `content` must already have trailing whitespace trimmed the way `gentools.py` does:
/// the md5sum is computed over the trimmed text, not the raw file contents.
pub fn compute_md5sum(content: &str) -> String {
    let digest = md5::compute(content.trim_end().as_bytes());
    format!("{digest:x}")
}

/// Computes the combined md5sum of a service's request and response definitions.
///
/// Mirrors `gentools.py`'s service-md5 algorithm: the two flattened definitions are hashed
/// as a single stream rather than hashed independently and combined.
pub fn compute_service_md5sum(request_content: &str, response_content: &str) -> String {
    let mut ctx = md5::Context::new();
    ctx.consume(request_content.trim_end().as_bytes());
    ctx.consume(response_content.trim_end().as_bytes());
    format!("{:x}", ctx.compute())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn std_msgs_string_md5_matches_known_value() {
        // std_msgs/String's one field flattens to this single line.
        let content = "string data";
        assert_eq!(compute_md5sum(content), "992ce8a1687cec8c8bd883ec73ca41d1");
    }

    #[test]
    fn service_md5_combines_request_and_response() {
        let a = compute_service_md5sum("bool data", "bool success\nstring message");
        let b = compute_service_md5sum("bool data", "bool success\nstring message");
        assert_eq!(a, b);
        let c = compute_service_md5sum("bool data", "bool success");
        assert_ne!(a, c);
    }
}

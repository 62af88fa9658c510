//! RESP2 reply encoder.

use super::Reply;

/// Encode a reply into `buf`.
pub fn encode_reply(reply: &Reply, buf: &mut Vec<u8>) {
    match reply {
        Reply::Simple(s) => {
            buf.push(b'+');
            buf.extend_from_slice(s.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Error(msg) => {
            buf.push(b'-');
            buf.extend_from_slice(msg.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Int(n) => {
            buf.push(b':');
            buf.extend_from_slice(n.to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(data) => {
            buf.push(b'$');
            buf.extend_from_slice(data.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            buf.extend_from_slice(data);
            buf.extend_from_slice(b"\r\n");
        }
        Reply::Array(elements) => {
            buf.push(b'*');
            buf.extend_from_slice(elements.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
            for elem in elements {
                encode_reply(elem, buf);
            }
        }
        Reply::Null => {
            buf.extend_from_slice(b"$-1\r\n");
        }
    }
}

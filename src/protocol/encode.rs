//! Command Encoder
//!
//! Serializes `(command, args...)` to SSDB's length-prefixed request framing:
//!
//! ```text
//! <len(tok0)>\n<tok0>\n<len(tok1)>\n<tok1>\n ... \n
//! ```
//!
//! Sizes are decimal byte-lengths of the *encoded* token; the request is terminated by a
//! trailing blank line.

/// Anything that can be rendered as one wire token.
pub trait Encodable {
    fn encode_into(&self, buf: &mut Vec<u8>);
}

impl Encodable for &str {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl Encodable for String {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }
}

impl Encodable for &[u8] {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

impl Encodable for Vec<u8> {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }
}

macro_rules! impl_encodable_int {
    ($($t:ty),*) => {
        $(
            impl Encodable for $t {
                fn encode_into(&self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(self.to_string().as_bytes());
                }
            }
        )*
    };
}

impl_encodable_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

/// Encodes one token as `<size>\n<bytes>\n`.
fn encode_block(token: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(token.len().to_string().as_bytes());
    out.push(b'\n');
    out.extend_from_slice(token);
    out.push(b'\n');
}

/// Encodes a full command into the wire framing described above.
///
/// `delete` is rewritten to `del` before encoding; no other command is aliased.
pub fn encode_command(command: &str, args: &[&dyn Encodable]) -> Vec<u8> {
    let command = if command == "delete" { "del" } else { command };

    let mut buf = Vec::new();
    encode_block(command.as_bytes(), &mut buf);

    let mut scratch = Vec::new();
    for arg in args {
        scratch.clear();
        arg.encode_into(&mut scratch);
        encode_block(&scratch, &mut buf);
    }

    buf.push(b'\n');
    buf
}

use crate::riverfront::pg::protocol::{Message, MessageReader};
use crate::riverfront::Result;

/// The key/value pairs carried in a PostgreSQL StartupMessage body: `user`, `database`,
/// `client_encoding`, `application_name`, `options`, and any other GUCs the client sets
/// at connect time. Parsed once out of the raw message body.
#[derive(Clone, Default)]
pub struct StartupParams {
    params: Vec<(String, String)>,
}

impl StartupParams {
    /// Parses the body of a Startup message: alternating null-terminated key/value
    /// strings, terminated by a final empty key.
    pub fn parse(msg: &Message) -> Result<Self> {
        let mut reader = MessageReader::new_at(msg, 8); // skip length + protocol version
        let mut params = Vec::new();
        loop {
            let key = reader.read_str()?;
            if key.is_empty() {
                break;
            }
            let value = reader.read_str()?;
            params.push((key.to_string(), value.to_string()));
        }
        Ok(Self { params })
    }

    pub fn get(&self, k: &str) -> Option<&str> {
        self.params.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

use crate::riverfront::pg::protocol::{Tag, MessageBuilder, Message, ErrorFieldTag};
use crate::riverfront::common::{Error, ErrorSeverity};

/// A builder for constructing Postgres wire protocol ErrorResponse/NoticeResponse messages.
pub struct MessageErrorBuilder(MessageBuilder);

impl MessageErrorBuilder {
    /// Construct a new message builder for Postgres errors
    pub fn new(severity: ErrorSeverity, code: &str, msg: &str) -> Self {
        let tag = if severity <= ErrorSeverity::Warning { Tag::NOTICE_RESPONSE } else { Tag::ERROR_RESPONSE };
        let mut builder = MessageErrorBuilder(MessageBuilder::new(tag));
        builder
            .write_field(ErrorFieldTag::SEVERITY, severity.as_pg_str())
            .write_field(ErrorFieldTag::LOCALIZED_SEVERITY, severity.as_pg_str())
            .write_field(ErrorFieldTag::CODE, code)
            .write_field(ErrorFieldTag::MESSAGE, msg);
        builder
    }

    /// Construct an ErrorResponse/NoticeResponse from our internal error taxonomy,
    /// using its severity and SQLSTATE code.
    pub fn from_error(err: &Error) -> Self {
        Self::new(err.severity(), err.sqlstate(), &err.to_string())
    }

    /// Write an error field with the given tag and value
    pub fn write_field(&mut self, field: ErrorFieldTag, s: &str) -> &mut Self {
        self.0.write_byte(field.as_u8());
        self.0.write_str(s);
        self
    }

    /// Complete the message and return it
    pub fn finish(mut self) -> Message {
        self.0.write_byte(ErrorFieldTag::NULL_TERMINATOR.as_u8());
        self.0.finish()
    }
}

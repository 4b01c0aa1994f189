mod message_parser;
mod tag;
mod message;
mod message_reader;
mod message_builder;
mod server_params;
mod startup_params;
mod row_description;
mod auth_md5;
mod auth_type;
mod errors;
mod message_error_builder;
pub mod error_codes;

pub use self::message::Message;
pub use self::message_parser::{MessageParser, Header};
pub use self::message_reader::MessageReader;
pub use self::message_builder::MessageBuilder;
pub use self::tag::{Tag, SSL_ALLOWED, SSL_NOT_ALLOWED, SSL_REQUEST, PROTOCOL_VERSION};
pub use self::server_params::ServerParams;
pub use self::startup_params::StartupParams;
pub use self::row_description::{RowDescription, FieldDescription, FormatCode};
pub use self::auth_md5::hash_md5_password;
pub use self::auth_type::AuthType;
pub use self::errors::{ErrorSeverity, ErrorFieldTag};
pub use self::message_error_builder::MessageErrorBuilder;

//! Network layer: the REST API client and the persistent realtime channel.

pub mod api;
pub mod channel;

mod error;

pub use api::{
    ApiClient, ConversationDto, FileUploadDto, LoginResponse, MessageDto, ParticipantDto,
    UserKeyPairDto, UserProfile,
};
pub use channel::{ChannelConfig, ChannelEvent, RealtimeChannel};
pub use error::{NetError, Result};

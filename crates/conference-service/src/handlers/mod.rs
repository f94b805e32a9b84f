//! HTTP request handlers for the conference service.

pub mod chats;
pub mod conferences;
pub mod devices;
pub mod health;
pub mod settings;
pub mod ws;

pub use chats::{
    clear_chat, delete_chat, delete_message, find_or_create_chat, get_chat, join_chat,
    list_chats, list_messages, send_message,
};
pub use conferences::{
    active_conferences, change_password, count_joins, create_conference, get_conference,
    join_conference, leave_conference, list_conferences, past_conferences, remove_membership,
    search_conferences,
};
pub use devices::{conference_devices, connect_devices, my_devices, participant_devices};
pub use health::{health_check, readiness_check};
pub use settings::{get_setting, update_setting};
pub use ws::chat_socket;

pub mod outbound_buffer;
pub mod send_pool;

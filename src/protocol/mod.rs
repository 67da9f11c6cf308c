mod builders;
mod constants;
mod parsers;
mod types;

pub use builders::{
    create_ack_packet, create_control_packet, create_keepalive_packet_ext, create_reg2_packet,
};
pub use constants::*;
pub use parsers::parse_keepalive_telemetry;
pub use types::{
    SenderTelemetry, get_packet_type, get_srt_sequence_number, is_srt_ack, is_srt_nak,
    is_srtla_keepalive, is_srtla_reg1, is_srtla_reg2,
};

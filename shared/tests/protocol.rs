//! Wire-layout tests for the host/target channel.
//!
//! The hook engine inside the target is built from the same definitions, so
//! these tests pin the byte layout rather than just the round trip.

use shared::constants::PIPE_BUFFER_SIZE;
use shared::hook::USING_UNICODE;
use shared::protocol::{
    MAX_NAME_LEN, NOTIFICATION_TEXT, HOST_COMMAND_DETACH, HOST_COMMAND_NEW_HOOK,
    HOST_COMMAND_REMOVE_HOOK,
};
use shared::{HookParam, HostCommand, PipeMessage, ProtocolError};

fn param() -> HookParam {
    HookParam { address: 0x1234_5678, hook_type: USING_UNICODE, ..Default::default() }
}

#[test]
fn new_hook_without_name_has_no_trailing_bytes() {
    let mut buf = [0u8; PIPE_BUFFER_SIZE];
    let msg = HostCommand::NewHook { param: param(), name: b"" }.encode(&mut buf).unwrap();

    assert_eq!(msg.len(), 4 + HookParam::SIZE);
    assert_eq!(&msg[..4], &HOST_COMMAND_NEW_HOOK.to_le_bytes());
    assert_eq!(HookParam::decode(&msg[4..]).unwrap(), param());
}

#[test]
fn new_hook_name_follows_param_without_terminator() {
    let mut buf = [0xFFu8; PIPE_BUFFER_SIZE];
    let msg = HostCommand::NewHook { param: param(), name: b"GetGlyphOutlineA" }
        .encode(&mut buf)
        .unwrap();

    assert_eq!(msg.len(), 4 + HookParam::SIZE + 16);
    assert_eq!(&msg[4 + HookParam::SIZE..], b"GetGlyphOutlineA");

    match HostCommand::decode(msg).unwrap() {
        HostCommand::NewHook { param: p, name } => {
            assert_eq!(p, param());
            assert_eq!(name, b"GetGlyphOutlineA");
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn oversized_name_is_rejected_before_encoding() {
    let mut buf = [0u8; PIPE_BUFFER_SIZE];
    let name = vec![b'a'; MAX_NAME_LEN + 1];
    let err = HostCommand::NewHook { param: param(), name: &name }.encode(&mut buf).unwrap_err();
    assert_eq!(err, ProtocolError::NameTooLong { len: MAX_NAME_LEN + 1, max: MAX_NAME_LEN });

    let name = vec![b'a'; MAX_NAME_LEN];
    let msg = HostCommand::NewHook { param: param(), name: &name }.encode(&mut buf).unwrap();
    assert_eq!(msg.len(), PIPE_BUFFER_SIZE);
}

#[test]
fn remove_hook_and_detach_are_fixed_size() {
    let mut buf = [0u8; PIPE_BUFFER_SIZE];
    let msg = HostCommand::RemoveHook { address: 0xCAFE }.encode(&mut buf).unwrap();
    assert_eq!(msg, &[1, 0, 0, 0, 0xFE, 0xCA, 0, 0]);
    assert_eq!(u32::from_le_bytes(msg[..4].try_into().unwrap()), HOST_COMMAND_REMOVE_HOOK);

    let msg = HostCommand::Detach.encode(&mut buf).unwrap();
    assert_eq!(msg, &HOST_COMMAND_DETACH.to_le_bytes());
    assert_eq!(HostCommand::decode(msg).unwrap(), HostCommand::Detach);
}

#[test]
fn decoding_rejects_malformed_commands() {
    assert_eq!(
        HostCommand::decode(&[9, 0, 0, 0]).unwrap_err(),
        ProtocolError::UnknownCommand(9)
    );
    assert_eq!(
        HostCommand::decode(&[1, 0, 0, 0, 1]).unwrap_err(),
        ProtocolError::Truncated { expected: 8, actual: 5 }
    );
    assert_eq!(
        HostCommand::decode(&[4, 0, 0, 0, 0]).unwrap_err(),
        ProtocolError::TrailingBytes(1)
    );
}

#[test]
fn text_message_carries_stream_identity() {
    let mut wire = Vec::new();
    PipeMessage::Text { hook: 0x401000, retn: 0x402000, split: 3, data: b"hello" }.encode(&mut wire);

    match PipeMessage::decode(&wire).unwrap() {
        PipeMessage::Text { hook, retn, split, data } => {
            assert_eq!((hook, retn, split), (0x401000, 0x402000, 3));
            assert_eq!(data, b"hello");
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn notification_is_told_apart_from_text() {
    let mut wire = Vec::new();
    PipeMessage::Notification { kind: NOTIFICATION_TEXT, payload: b"hook inserted" }.encode(&mut wire);
    assert_eq!(
        PipeMessage::decode(&wire).unwrap(),
        PipeMessage::Notification { kind: NOTIFICATION_TEXT, payload: b"hook inserted" }
    );

    assert!(matches!(
        PipeMessage::decode(&[0, 0, 0, 0, 0, 0, 0, 0, 0]),
        Err(ProtocolError::Truncated { expected: 12, actual: 9 })
    ));
}

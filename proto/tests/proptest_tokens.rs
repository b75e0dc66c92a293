//! Property tests for the remctl wire format.
//!
//! 1. Every well-formed token survives encode → decode unchanged
//! 2. COMMAND bodies carry argc and 6 + Σ(4 + len) bytes
//! 3. Frame headers without the PROTOCOL bit never decode
//! 4. Frame lengths above the maximum never decode

use proptest::prelude::*;
use remctl_proto::{
    decode_header, flags, ErrorCode, ProtocolError, Stream, Token, HEADER_SIZE, MAX_FRAME_PAYLOAD,
};

// ── Strategies ──────────────────────────────────────────────────────────

fn arg_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[ -~]{0,64}".prop_map(String::into_bytes),
        proptest::collection::vec(any::<u8>(), 0..1024),
    ]
}

fn command_strategy() -> impl Strategy<Value = Token> {
    (any::<bool>(), proptest::collection::vec(arg_strategy(), 1..32))
        .prop_map(|(keepalive, args)| Token::Command { keepalive, args })
}

fn output_strategy() -> impl Strategy<Value = Token> {
    (
        prop_oneof![Just(Stream::Stdout), Just(Stream::Stderr)],
        proptest::collection::vec(any::<u8>(), 0..65536),
    )
        .prop_map(|(stream, data)| Token::Output { stream, data })
}

fn token_strategy() -> impl Strategy<Value = Token> {
    prop_oneof![
        command_strategy(),
        Just(Token::Quit),
        output_strategy(),
        any::<u8>().prop_map(|exit| Token::Status { exit }),
        (any::<u32>(), ".{0,128}").prop_map(|(code, message)| Token::Error {
            code: ErrorCode::from_u32(code),
            message,
        }),
        (2u8..=255).prop_map(|highest| Token::Version { highest }),
        Just(Token::Noop),
    ]
}

// ═══════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn token_roundtrip(token in token_strategy()) {
        let encoded = token.encode().unwrap();
        prop_assert_eq!(Token::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn command_body_length(token in command_strategy()) {
        let encoded = token.encode().unwrap();
        let Token::Command { args, .. } = &token else { unreachable!() };

        let body = &encoded[2..];
        let argc = u32::from_be_bytes([body[2], body[3], body[4], body[5]]) as usize;
        prop_assert_eq!(argc, args.len());

        let expected: usize = 6 + args.iter().map(|a| 4 + a.len()).sum::<usize>();
        prop_assert_eq!(body.len(), expected);
    }

    #[test]
    fn output_roundtrip_preserves_bytes(token in output_strategy()) {
        let encoded = token.encode().unwrap();
        prop_assert_eq!(Token::decode(&encoded).unwrap(), token);
    }

    #[test]
    fn missing_protocol_flag_never_decodes(raw in any::<u8>(), len in 0u32..1024) {
        let flags = raw & !flags::PROTOCOL;
        let l = len.to_be_bytes();
        let header: [u8; HEADER_SIZE] = [flags, l[0], l[1], l[2], l[3]];
        prop_assert_eq!(decode_header(&header), Err(ProtocolError::V1Unsupported));
    }

    #[test]
    fn oversize_length_never_decodes(extra in 1u32..1_000_000) {
        let len = (MAX_FRAME_PAYLOAD as u32).saturating_add(extra).to_be_bytes();
        let header = [flags::DATA | flags::PROTOCOL, len[0], len[1], len[2], len[3]];
        let err = decode_header(&header).unwrap_err();
        prop_assert_eq!(err.code(), ErrorCode::BadToken);
    }
}

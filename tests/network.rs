//! End-to-end protocol scenarios over real sockets.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use cobalt::config::{NodeConfig, ProtocolConfig};
use cobalt::core::storage::MemoryStore;
use cobalt::core::transaction::{Input, Output, Transaction, TxData, Witness};
use cobalt::core::Blockchain;
use cobalt::network::message::{FrameHeader, Message, FRAME_HEADER_SIZE};
use cobalt::network::payload::{GetBlocksPayload, VersionPayload};
use cobalt::network::{Command, Payload, RelayReason, Server};
use cobalt::testutil::{new_test_chain, TestChain};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn test_node_config() -> NodeConfig {
    NodeConfig {
        address: "127.0.0.1".into(),
        port: 0,
        proto_tick_interval: Duration::from_millis(100),
        dial_timeout: Duration::from_secs(1),
        min_peers: 1,
        attempt_conn_peers: 2,
        ..NodeConfig::default()
    }
}

async fn write_message(stream: &mut TcpStream, msg: &Message) {
    let bytes = msg.encode().unwrap();
    timeout(IO_TIMEOUT, stream.write_all(&bytes))
        .await
        .expect("write timed out")
        .unwrap();
}

async fn read_message(stream: &mut TcpStream, magic: u32) -> Message {
    loop {
        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        timeout(IO_TIMEOUT, stream.read_exact(&mut header_buf))
            .await
            .expect("read timed out")
            .unwrap();
        let header = FrameHeader::decode(&header_buf);
        let mut payload = vec![0u8; header.length as usize];
        timeout(IO_TIMEOUT, stream.read_exact(&mut payload))
            .await
            .expect("read timed out")
            .unwrap();
        if let Some(msg) = Message::from_frame(&header, &payload, magic).unwrap() {
            return msg;
        }
    }
}

/// Reads until a message with the wanted command arrives, skipping
/// everything else the server may interleave.
async fn expect_command(stream: &mut TcpStream, magic: u32, command: Command) -> Message {
    for _ in 0..32 {
        let msg = read_message(stream, magic).await;
        if msg.command == command {
            return msg;
        }
    }
    panic!("no {command:?} within 32 messages");
}

/// Performs the client side of the handshake against a started server.
async fn handshake(stream: &mut TcpStream, magic: u32, nonce: u32) {
    let msg = expect_command(stream, magic, Command::Version).await;
    let Payload::Version(_server_version) = msg.payload else {
        panic!("version payload expected");
    };
    let version = VersionPayload::new(nonce, 0, "/cobalt-test:0.1/", 0, true);
    write_message(
        stream,
        &Message::new(magic, Command::Version, Payload::Version(version)),
    )
    .await;
    expect_command(stream, magic, Command::Verack).await;
    write_message(stream, &Message::new(magic, Command::Verack, Payload::Null)).await;
}

#[tokio::test]
async fn handshake_then_headers_are_served() {
    let fixture = new_test_chain(1);
    fixture.grow(3);
    let magic = fixture.chain.protocol().magic;

    let server = Server::new(test_node_config(), fixture.chain.clone());
    let addr = server.start().await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    handshake(&mut client, magic, 0xfeed_f00d).await;

    // Ask for everything after genesis.
    let locator = GetBlocksPayload::new(vec![fixture.chain.genesis_block().hash()], Default::default());
    write_message(
        &mut client,
        &Message::new(magic, Command::GetHeaders, Payload::GetBlocks(locator)),
    )
    .await;

    let msg = expect_command(&mut client, magic, Command::Headers).await;
    let Payload::Headers(headers) = msg.payload else { panic!() };
    assert_eq!(headers.headers.len(), 3);
    let indexes: Vec<u32> = headers.headers.iter().map(|h| h.base.index).collect();
    assert_eq!(indexes, vec![1, 2, 3]);

    server.shutdown();
}

#[tokio::test]
async fn ping_is_answered_with_our_height() {
    let fixture = new_test_chain(1);
    fixture.grow(2);
    let magic = fixture.chain.protocol().magic;

    let server = Server::new(test_node_config(), fixture.chain.clone());
    let addr = server.start().await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    handshake(&mut client, magic, 7).await;

    let ping = cobalt::network::payload::PingPayload::new(0, 99);
    write_message(&mut client, &Message::new(magic, Command::Ping, Payload::Ping(ping))).await;
    let msg = expect_command(&mut client, magic, Command::Pong).await;
    let Payload::Ping(pong) = msg.payload else { panic!() };
    assert_eq!(pong.last_block_index, 2);
    assert_eq!(pong.nonce, 99);

    server.shutdown();
}

#[tokio::test]
async fn loopback_nonce_is_rejected() {
    let fixture = new_test_chain(1);
    let magic = fixture.chain.protocol().magic;
    let server = Server::new(test_node_config(), fixture.chain.clone());
    let addr = server.start().await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    let msg = expect_command(&mut client, magic, Command::Version).await;
    let Payload::Version(server_version) = msg.payload else { panic!() };

    // Echo the server's own nonce back; it must drop the connection
    // instead of answering with a verack.
    let version = VersionPayload::new(server_version.nonce, 0, "", 0, true);
    write_message(
        &mut client,
        &Message::new(magic, Command::Version, Payload::Version(version)),
    )
    .await;

    let mut buf = [0u8; 1];
    let read = timeout(IO_TIMEOUT, client.read(&mut buf)).await.unwrap();
    assert_eq!(read.unwrap(), 0, "expected the server to close the socket");

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_node_syncs_from_seeded_peer() {
    let source = new_test_chain(1);
    source.grow(5);

    let server_a = Server::new(test_node_config(), source.chain.clone());
    let addr_a = server_a.start().await.unwrap();

    // A fresh chain on the same network with A as its only seed.
    let mut protocol = ProtocolConfig::default();
    protocol.standby_validators = source
        .validators
        .iter()
        .map(|pair| pair.public_key().to_string())
        .collect();
    protocol.seed_list = vec![addr_a.to_string()];
    let chain_b = Arc::new(
        Blockchain::new(Arc::new(MemoryStore::new()), protocol, 100).unwrap(),
    );

    let server_b = Server::new(test_node_config(), chain_b.clone());
    server_b.start().await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while chain_b.block_height() < 5 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "sync stalled at height {}",
            chain_b.block_height()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(chain_b.block_height(), 5);
    assert_eq!(chain_b.current_block_hash(), source.chain.current_block_hash());

    server_a.shutdown();
    server_b.shutdown();
}

#[tokio::test]
async fn relay_reasons() {
    let fixture = new_test_chain(1);
    let server = Server::new(test_node_config(), fixture.chain.clone());

    // Miner transactions never relay.
    let miner = Transaction::new(TxData::Miner { nonce: 1 });
    assert_eq!(server.relay_tx(miner).await, RelayReason::Invalid);

    // A proper transfer of the genesis issue output.
    let transfer = signed_genesis_spend(&fixture);
    assert_eq!(server.relay_tx(transfer.clone()).await, RelayReason::Succeed);
    assert!(fixture.chain.mempool().contains(&transfer.hash()));

    // Again: already pooled.
    assert_eq!(
        server.relay_tx(transfer.clone()).await,
        RelayReason::AlreadyExists
    );

    // A conflicting spend of the same input.
    let mut conflict = transfer.clone();
    conflict.attributes.push(cobalt::core::transaction::Attribute {
        usage: cobalt::core::transaction::AttrUsage::Remark(0xf0),
        data: b"conflict".to_vec(),
    });
    assert_eq!(server.relay_tx(conflict).await, RelayReason::Invalid);

    // A transaction with a missing reference.
    let mut bogus = Transaction::new(TxData::Contract);
    bogus.inputs.push(Input {
        prev_hash: cobalt::crypto::hash::sha256(b"nowhere"),
        prev_index: 0,
    });
    assert_eq!(server.relay_tx(bogus).await, RelayReason::Invalid);
}

/// Builds a validly witnessed transaction spending the genesis issue
/// output back to the validators' own address.
fn signed_genesis_spend(fixture: &TestChain) -> Transaction {
    let issue = fixture.chain.genesis_block().transactions[3].clone();
    let owner = issue.outputs[0].script_hash;

    let mut tx = Transaction::new(TxData::Contract);
    tx.inputs.push(Input {
        prev_hash: issue.hash(),
        prev_index: 0,
    });
    tx.outputs.push(Output {
        asset_id: issue.outputs[0].asset_id,
        amount: issue.outputs[0].amount,
        script_hash: owner,
    });

    let keys: Vec<_> = fixture
        .validators
        .iter()
        .map(|pair| pair.public_key().clone())
        .collect();
    let verification =
        cobalt::smartcontract::create_multisig_redeem_script(1, &keys).unwrap();
    let mut invocation = cobalt::vm::ScriptBuilder::new();
    invocation
        .emit_push_bytes(&fixture.validators[0].sign(&tx.sighash()))
        .unwrap();
    tx.scripts.push(Witness {
        invocation_script: invocation.into_script(),
        verification_script: verification,
    });
    tx
}

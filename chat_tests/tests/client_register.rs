//! Client-level registration integration test (§4.3, §7 duplicate identity).

use chat_client::client::{ChatClient, ExitReason};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_client_with_same_name_gets_duplicate_exit_reason() -> anyhow::Result<()> {
    let server = chat_server::server::ChatServer::bind(0).await?;
    let server_addr = server.local_addr()?;
    tokio::spawn(server.run());

    let c1 = ChatClient::bind("dupe", 0, server_addr).await?;
    assert_eq!(c1.register().await?, ExitReason::Clean);

    let c2 = ChatClient::bind("dupe", 0, server_addr).await?;
    assert_eq!(c2.register().await?, ExitReason::DuplicateName);
    Ok(())
}

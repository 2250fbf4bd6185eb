// Copyright (c) 2026 Orbitfs
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Interactive line client for a running node.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use orbitfs::core::types::{Document, DIRECTORY_CONTENT_TYPE};
use orbitfs::networking::rpc::{Request, Response, RpcClient};
use orbitfs::networking::tls;

const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const MSG_SIZE: usize = 16 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let addr = std::env::args()
        .nth(1)
        .context("usage: console <host:port>")?;

    let config = tls::accept_any_client_config()?;
    let stream = tls::connect(&addr, config, DIAL_TIMEOUT).await?;
    let client = RpcClient::start(stream, MSG_SIZE, CancellationToken::new());

    println!("Connected to {addr}. Type 'help' to list commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("orbitfs> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let cmd: Vec<&str> = line.split_whitespace().collect();
        let result = match cmd.first().copied() {
            None => Ok(()),
            Some("get") => get(&client, &cmd).await,
            Some("add") => add(&client, &cmd).await,
            Some("peers") => peers(&client, &cmd).await,
            Some("reference") => reference(&client, &cmd).await,
            Some("publish") => publish(&client, &cmd).await,
            Some("subscribe") => subscribe(&client, &cmd).await,
            Some("help") => {
                help();
                Ok(())
            }
            Some("quit") => break,
            Some(other) => {
                println!("unknown command {other:?}; type 'help'");
                Ok(())
            }
        };
        if let Err(e) = result {
            println!("{e:#}");
        }
    }
    Ok(())
}

fn help() {
    println!("Commands:");
    println!("  get <access_id>                            fetch a document");
    println!("  add <path>                                 add a file");
    println!("  add -r <dir>                               add a directory tree");
    println!("  add -c <name,id:key;...>                   parent existing documents");
    println!("  peers list                                 list known peers");
    println!("  peers add <host:port>                      bootstrap a peer");
    println!("  reference get <reference_id[:key]>         fetch a reference");
    println!("  reference add <record> <keyfile>           add or update a reference");
    println!("  publish <message> <keyfile>                publish on the key's channel");
    println!("  subscribe <reference_id>                    stream channel messages");
    println!("  quit                                        exit");
}

async fn call(client: &RpcClient, request: Request) -> Result<Response> {
    match tokio::time::timeout(CALL_TIMEOUT, client.call(request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => bail!("{e}"),
        Err(_) => bail!("call timed out"),
    }
}

async fn get(client: &RpcClient, cmd: &[&str]) -> Result<()> {
    if cmd.len() != 2 {
        bail!("usage: get <access_id>");
    }
    if !cmd[1].contains(':') {
        bail!("access id must be of the form document_id:access_key");
    }
    let response = call(
        client,
        Request::Get {
            access_id: cmd[1].to_string(),
        },
    )
    .await?;
    let Response::Document { document } = response else {
        bail!("unexpected response");
    };
    if document.content_type == DIRECTORY_CONTENT_TYPE {
        println!("Child documents:");
        for (name, access_id) in &document.children {
            println!("  {name}: {access_id}");
        }
    } else {
        println!("{}", String::from_utf8_lossy(&document.data));
    }
    Ok(())
}

async fn add_file(client: &RpcClient, path: &Path) -> Result<String> {
    let data = std::fs::read(path).with_context(|| format!("reading {path:?}"))?;
    let content_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();
    let response = call(
        client,
        Request::Add {
            document: Document {
                data,
                content_type,
                ..Document::default()
            },
        },
    )
    .await?;
    match response {
        Response::Added { access_id } => Ok(access_id),
        _ => bail!("unexpected response"),
    }
}

fn add_dir<'a>(
    client: &'a RpcClient,
    dir: &'a Path,
) -> futures::future::BoxFuture<'a, Result<String>> {
    Box::pin(async move {
        let mut children = BTreeMap::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("reading {dir:?}"))? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let access_id = if path.is_dir() {
                add_dir(client, &path).await?
            } else {
                add_file(client, &path).await?
            };
            children.insert(name, access_id);
        }
        let response = call(
            client,
            Request::Add {
                document: Document {
                    content_type: DIRECTORY_CONTENT_TYPE.to_string(),
                    children,
                    ..Document::default()
                },
            },
        )
        .await?;
        match response {
            Response::Added { access_id } => Ok(access_id),
            _ => bail!("unexpected response"),
        }
    })
}

async fn add(client: &RpcClient, cmd: &[&str]) -> Result<()> {
    match cmd {
        [_, path] if *path != "-r" && *path != "-c" => {
            let access_id = add_file(client, Path::new(path)).await?;
            println!("Access ID: {access_id}");
        }
        [_, "-r", dir] => {
            let dir = Path::new(dir);
            if !dir.is_dir() {
                bail!("{dir:?} is not a directory");
            }
            let access_id = add_dir(client, dir).await?;
            println!("Access ID: {access_id}");
        }
        [_, "-c", list] => {
            let mut children = BTreeMap::new();
            for pair in list.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                let Some((name, access_id)) = pair.split_once(',') else {
                    bail!("children must be of the form name,document_id:access_key;...");
                };
                children.insert(name.to_string(), access_id.to_string());
            }
            let response = call(
                client,
                Request::Add {
                    document: Document {
                        content_type: DIRECTORY_CONTENT_TYPE.to_string(),
                        children,
                        ..Document::default()
                    },
                },
            )
            .await?;
            let Response::Added { access_id } = response else {
                bail!("unexpected response");
            };
            println!("Access ID: {access_id}");
        }
        _ => bail!("usage: add <path> | add -r <dir> | add -c <name,id:key;...>"),
    }
    Ok(())
}

async fn peers(client: &RpcClient, cmd: &[&str]) -> Result<()> {
    match cmd {
        [_, "list"] => {
            let Response::Peers { peers } = call(client, Request::GetPeers).await? else {
                bail!("unexpected response");
            };
            if peers.is_empty() {
                println!("no known peers");
            }
            for peer in peers {
                println!("{}  {}", peer.id, peer.addrs.join(","));
            }
        }
        [_, "add", addr] => {
            call(
                client,
                Request::AddPeer {
                    addr: addr.to_string(),
                },
            )
            .await?;
            println!("ok");
        }
        _ => bail!("usage: peers list | peers add <host:port>"),
    }
    Ok(())
}

async fn reference(client: &RpcClient, cmd: &[&str]) -> Result<()> {
    match cmd {
        [_, "get", reference_id] => {
            let Response::Reference { reference } = call(
                client,
                Request::GetReference {
                    reference_id: reference_id.to_string(),
                },
            )
            .await?
            else {
                bail!("unexpected response");
            };
            println!("{}", String::from_utf8_lossy(&reference.value));
        }
        [_, "add", record, keyfile] => {
            if !record.contains("document@") && !record.contains("reference@") {
                bail!("record must be document@id:key or reference@id:key");
            }
            let private_key_pem = std::fs::read_to_string(keyfile)
                .with_context(|| format!("reading {keyfile:?}"))?;
            let Response::ReferenceAdded { reference_id } = call(
                client,
                Request::AddReference {
                    private_key_pem,
                    record: record.to_string(),
                },
            )
            .await?
            else {
                bail!("unexpected response");
            };
            println!("{reference_id}");
        }
        _ => bail!("usage: reference get <id[:key]> | reference add <record> <keyfile>"),
    }
    Ok(())
}

async fn publish(client: &RpcClient, cmd: &[&str]) -> Result<()> {
    let [_, message, keyfile] = cmd else {
        bail!("usage: publish <message> <keyfile>");
    };
    let private_key_pem =
        std::fs::read_to_string(keyfile).with_context(|| format!("reading {keyfile:?}"))?;
    let Response::Published { listeners } = call(
        client,
        Request::Publish {
            private_key_pem,
            message: message.to_string(),
        },
    )
    .await?
    else {
        bail!("unexpected response");
    };
    println!("delivered to {listeners} listeners");
    Ok(())
}

async fn subscribe(client: &RpcClient, cmd: &[&str]) -> Result<()> {
    let [_, channel_id] = cmd else {
        bail!("usage: subscribe <reference_id>");
    };
    let mut rx = client
        .subscribe_request(Request::SubscribeClient {
            channel_id: channel_id.to_string(),
        })
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("subscribed; waiting for messages (stream ends on disconnect)");
    while let Some(message) = rx.recv().await {
        println!("[{}] {}", message.timestamp, message.message);
    }
    println!("stream ended");
    Ok(())
}

//! A scripted in-process bus for exercising connections over a socket
//! pair: authentication, `Hello`, match management and the name request
//! protocol, plus directed and broadcast signals.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use unibus::{Connection, Message, MessageKind, ObjectPath};

pub const BUS_NAME: &str = "org.freedesktop.DBus";
pub const BUS_PATH: &ObjectPath = ObjectPath::new_const(b"/org/freedesktop/DBus");

pub struct FakeBus {
    state: Arc<Mutex<BusState>>,
}

struct BusState {
    next_unique: u32,
    next_id: u64,
    clients: HashMap<u64, ClientEntry>,
    names: HashMap<String, Vec<NameEntry>>,
}

struct ClientEntry {
    unique: Option<String>,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Clone)]
struct NameEntry {
    client: u64,
    unique: String,
    allow_replacement: bool,
}

impl FakeBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                next_unique: 0,
                next_id: 0,
                clients: HashMap::new(),
                names: HashMap::new(),
            })),
        }
    }

    /// Connect a new client, driving its bus side in background tasks.
    pub async fn connect(&self) -> unibus::Result<Connection> {
        let (client, server) = std::os::unix::net::UnixStream::pair()?;
        server.set_nonblocking(true)?;
        let server = UnixStream::from_std(server)?;

        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut state = self.state.lock().unwrap();
            let id = state.next_id;
            state.next_id += 1;
            state.clients.insert(
                id,
                ClientEntry {
                    unique: None,
                    tx: tx.clone(),
                },
            );
            id
        };

        tokio::spawn(client_task(self.state.clone(), id, server, tx, rx));

        Connection::from_std(client).await
    }

    /// Broadcast a `NameOwnerChanged` signal to every connected client.
    pub fn broadcast_name_owner_changed(&self, name: &str, old: &str, new: &str) {
        let state = self.state.lock().unwrap();

        for client in state.clients.values() {
            let Some(unique) = &client.unique else {
                continue;
            };

            let message = Message::signal(BUS_PATH, BUS_NAME, "NameOwnerChanged")
                .with_sender(BUS_NAME)
                .with_destination(unique)
                .with_args(&(name, old, new))
                .unwrap();

            _ = client.tx.send(message);
        }
    }
}

async fn client_task(
    state: Arc<Mutex<BusState>>,
    id: u64,
    stream: UnixStream,
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
) {
    let (read, mut write) = stream.into_split();
    let mut read = BufReader::new(read);

    if sasl(&mut read, &mut write).await.is_err() {
        return;
    }

    tokio::spawn(writer(write, rx));

    loop {
        let message = match read_frame(&mut read).await {
            Ok(Some(message)) => message,
            _ => break,
        };

        handle(&state, id, &tx, message);
    }

    state.lock().unwrap().clients.remove(&id);
}

async fn sasl(
    read: &mut BufReader<OwnedReadHalf>,
    write: &mut OwnedWriteHalf,
) -> std::io::Result<()> {
    loop {
        let mut line = Vec::new();
        read.read_until(b'\n', &mut line).await?;

        if line.is_empty() {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }

        let line = String::from_utf8_lossy(&line);
        let line = line.trim_start_matches('\0').trim();

        if line.starts_with("AUTH") {
            write.write_all(b"OK 746573742d6775696400\r\n").await?;
        } else if line == "NEGOTIATE_UNIX_FD" {
            write.write_all(b"AGREE_UNIX_FD\r\n").await?;
        } else if line == "BEGIN" {
            return Ok(());
        }
    }
}

async fn writer(mut write: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Message>) {
    let mut serial = 0u32;

    while let Some(message) = rx.recv().await {
        serial += 1;
        let message = message.with_serial(NonZeroU32::new(serial).unwrap());
        let bytes = message.encode().unwrap();

        if write.write_all(&bytes).await.is_err() {
            break;
        }
    }
}

async fn read_frame(
    read: &mut BufReader<OwnedReadHalf>,
) -> anyhow::Result<Option<Message>> {
    let mut prefix = [0u8; 16];

    if read.read_exact(&mut prefix).await.is_err() {
        return Ok(None);
    }

    let little = prefix[0] == b'l';

    let load = |bytes: [u8; 4]| {
        if little {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        }
    };

    let body = load(prefix[4..8].try_into().unwrap()) as usize;
    let fields = load(prefix[12..16].try_into().unwrap()) as usize;

    let headers = 16 + fields;
    let total = headers + (8 - headers % 8) % 8 + body;

    let mut frame = vec![0u8; total];
    frame[..16].copy_from_slice(&prefix);
    read.read_exact(&mut frame[16..]).await?;

    Ok(Some(Message::decode(&frame, &mut VecDeque::new())?))
}

fn handle(state: &Arc<Mutex<BusState>>, id: u64, tx: &mpsc::UnboundedSender<Message>, message: Message) {
    if message.kind() != MessageKind::MethodCall {
        return;
    }

    let serial = message.serial().unwrap();

    let reply = |args: Message| args.with_sender(BUS_NAME);

    match (message.interface(), message.member()) {
        (Some("org.freedesktop.DBus"), Some("Hello")) => {
            let unique = {
                let mut state = state.lock().unwrap();
                state.next_unique += 1;
                let unique = format!(":1.{}", state.next_unique);

                if let Some(client) = state.clients.get_mut(&id) {
                    client.unique = Some(unique.clone());
                }

                unique
            };

            _ = tx.send(reply(
                Message::method_return(serial)
                    .with_destination(&unique)
                    .with_args(&(unique.as_str(),))
                    .unwrap(),
            ));
        }
        (Some("org.freedesktop.DBus"), Some("AddMatch" | "RemoveMatch")) => {
            _ = tx.send(reply(Message::method_return(serial)));
        }
        (Some("org.freedesktop.DBus"), Some("GetId")) => {
            _ = tx.send(reply(
                Message::method_return(serial)
                    .with_args(&("fake-bus-0",))
                    .unwrap(),
            ));
        }
        (Some("org.freedesktop.DBus"), Some("RequestName")) => {
            let (name, flags): (String, u32) = message.parse_args().unwrap();
            let code = request_name(state, id, &name, flags);

            _ = tx.send(reply(
                Message::method_return(serial).with_args(&(code,)).unwrap(),
            ));
        }
        (Some("org.freedesktop.DBus"), Some("ReleaseName")) => {
            let (name,): (String,) = message.parse_args().unwrap();
            let code = release_name(state, id, &name);

            _ = tx.send(reply(
                Message::method_return(serial).with_args(&(code,)).unwrap(),
            ));
        }
        (Some("org.freedesktop.DBus"), Some("ListQueuedOwners")) => {
            let (name,): (String,) = message.parse_args().unwrap();

            let owners: Vec<String> = {
                let state = state.lock().unwrap();
                state
                    .names
                    .get(&name)
                    .map(|queue| queue.iter().map(|entry| entry.unique.clone()).collect())
                    .unwrap_or_default()
            };

            _ = tx.send(reply(
                Message::method_return(serial).with_args(&(owners,)).unwrap(),
            ));
        }
        (Some("org.freedesktop.DBus.Peer"), Some("Ping")) => {
            _ = tx.send(reply(Message::method_return(serial)));
        }
        (_, Some("Slow")) => {
            // Reply long after the caller has typically given up.
            let tx = tx.clone();

            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                _ = tx.send(
                    Message::method_return(serial)
                        .with_sender(BUS_NAME)
                        .with_args(&("late",))
                        .unwrap(),
                );
            });
        }
        (_, member) => {
            _ = tx.send(reply(
                Message::error("org.freedesktop.DBus.Error.UnknownMethod", serial)
                    .with_args(&(format!("no such method {member:?}"),))
                    .unwrap(),
            ));
        }
    }
}

fn signal_to(member: &str, name: &str, destination: &str) -> Message {
    Message::signal(BUS_PATH, BUS_NAME, member)
        .with_sender(BUS_NAME)
        .with_destination(destination)
        .with_args(&(name,))
        .unwrap()
}

fn request_name(state: &Arc<Mutex<BusState>>, id: u64, name: &str, flags: u32) -> u32 {
    let allow_replacement = flags & 1 != 0;
    let try_replace = flags & 2 != 0;
    let no_queue = flags & 4 != 0;

    let mut state = state.lock().unwrap();
    let state = &mut *state;

    let Some(unique) = state
        .clients
        .get(&id)
        .and_then(|client| client.unique.clone())
    else {
        return 3;
    };

    let queue = state.names.entry(name.to_owned()).or_default();

    let entry = NameEntry {
        client: id,
        unique: unique.clone(),
        allow_replacement,
    };

    if queue.is_empty() {
        queue.push(entry);
        send_to(&state.clients, id, signal_to("NameAcquired", name, &unique));
        broadcast_owner_change(&state.clients, name, "", &unique);
        return 1;
    }

    if queue[0].client == id {
        queue[0].allow_replacement = allow_replacement;
        return 4;
    }

    if try_replace && queue[0].allow_replacement {
        let old = queue.remove(0);
        queue.retain(|entry| entry.client != id);

        let mut new_queue = vec![entry, old.clone()];
        new_queue.append(queue);
        *queue = new_queue;

        send_to(&state.clients, old.client, signal_to("NameLost", name, &old.unique));
        send_to(&state.clients, id, signal_to("NameAcquired", name, &unique));
        broadcast_owner_change(&state.clients, name, &old.unique, &unique);
        return 1;
    }

    if no_queue {
        return 3;
    }

    match queue.iter_mut().find(|entry| entry.client == id) {
        Some(existing) => existing.allow_replacement = allow_replacement,
        None => queue.push(entry),
    }

    2
}

fn release_name(state: &Arc<Mutex<BusState>>, id: u64, name: &str) -> u32 {
    let mut state = state.lock().unwrap();
    let state = &mut *state;

    let Some(queue) = state.names.get_mut(name) else {
        return 2;
    };

    if queue.is_empty() {
        return 2;
    }

    if queue[0].client == id {
        let old = queue.remove(0);
        send_to(&state.clients, old.client, signal_to("NameLost", name, &old.unique));

        match queue.first() {
            Some(next) => {
                send_to(
                    &state.clients,
                    next.client,
                    signal_to("NameAcquired", name, &next.unique),
                );
                broadcast_owner_change(&state.clients, name, &old.unique, &next.unique.clone());
            }
            None => {
                broadcast_owner_change(&state.clients, name, &old.unique, "");
            }
        }

        return 1;
    }

    let before = queue.len();
    queue.retain(|entry| entry.client != id);

    if queue.len() != before {
        1
    } else {
        3
    }
}

fn send_to(clients: &HashMap<u64, ClientEntry>, id: u64, message: Message) {
    if let Some(client) = clients.get(&id) {
        _ = client.tx.send(message);
    }
}

fn broadcast_owner_change(
    clients: &HashMap<u64, ClientEntry>,
    name: &str,
    old: &str,
    new: &str,
) {
    for client in clients.values() {
        let Some(unique) = &client.unique else {
            continue;
        };

        let message = Message::signal(BUS_PATH, BUS_NAME, "NameOwnerChanged")
            .with_sender(BUS_NAME)
            .with_destination(unique)
            .with_args(&(name, old, new))
            .unwrap();

        _ = client.tx.send(message);
    }
}

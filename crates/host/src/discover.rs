//! UDP discovery: drosses broadcast `{event, data}` datagrams on the local
//! network; they are turned into [`DrosseEvent`]s for the event stream.

use std::net::SocketAddr;

use anyhow::{anyhow, Context};
use host_api::{merge_advertisement, ApiContext};
use serde_json::Value;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use shared::{
    domain::{Drosse, DrosseId},
    protocol::{DrosseEvent, TrafficRequest},
};
use tokio::{net::UdpSocket, sync::broadcast};
use tracing::{debug, info, warn};

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_507;

#[derive(Debug, PartialEq)]
pub(crate) enum Announcement {
    /// A drosse advertising itself; still to be merged with its stored record.
    Advertisement(Drosse),
    Event(DrosseEvent),
}

pub(crate) fn parse_datagram(bytes: &[u8]) -> anyhow::Result<Option<Announcement>> {
    let json: Value = serde_json::from_slice(bytes).context("datagram is not JSON")?;
    let data = &json["data"];

    if let Some(advertisement) = data["advertisement"].as_object() {
        if !advertisement.is_empty() {
            let drosse: Drosse = serde_json::from_value(Value::Object(advertisement.clone()))
                .context("invalid drosse advertisement")?;
            return Ok(Some(Announcement::Advertisement(drosse)));
        }
    }

    let event = json["event"]
        .as_str()
        .ok_or_else(|| anyhow!("datagram has no event name"))?;
    let announcement = match event {
        "up" => Announcement::Advertisement(Drosse::new(uuid_of(data)?)),
        "down" => Announcement::Event(DrosseEvent::Down {
            uuid: uuid_of(data)?,
        }),
        "log" => {
            let msg = match data.get("msg") {
                Some(msg) => msg.clone(),
                None => data.clone(),
            };
            Announcement::Event(DrosseEvent::Log {
                uuid: uuid_of(data)?,
                msg,
            })
        }
        "request" => Announcement::Event(DrosseEvent::Request {
            request: TrafficRequest {
                method: string_field(data, "method")?,
                url: string_field(data, "url")?,
                uuid: uuid_of(data)?,
            },
        }),
        other => {
            debug!(event = other, "ignoring unknown discovery event");
            return Ok(None);
        }
    };
    Ok(Some(announcement))
}

fn uuid_of(data: &Value) -> anyhow::Result<DrosseId> {
    let uuid = string_field(data, "uuid")?;
    if uuid.trim().is_empty() {
        return Err(anyhow!("datagram carries an empty uuid"));
    }
    Ok(DrosseId::new(uuid))
}

fn string_field(data: &Value, name: &str) -> anyhow::Result<String> {
    data[name]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("datagram data has no string `{name}`"))
}

/// Turns an announcement into the event pushed to front ends.
pub(crate) async fn resolve(
    api: &ApiContext,
    announcement: Announcement,
) -> anyhow::Result<DrosseEvent> {
    match announcement {
        Announcement::Advertisement(advertised) => {
            let drosse = merge_advertisement(api, advertised)
                .await
                .map_err(|err| anyhow!(err))?;
            Ok(DrosseEvent::Up { drosse })
        }
        Announcement::Event(event) => Ok(event),
    }
}

/// Binds the discovery socket with address and port reuse, so several
/// listeners on one machine can share the broadcast port.
pub(crate) async fn bind(addr: &str) -> anyhow::Result<UdpSocket> {
    let socket_addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid discovery address {addr}"))?;
    let socket = Socket::new(
        Domain::for_address(socket_addr),
        Type::DGRAM,
        Some(Protocol::UDP),
    )?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket
        .bind(&SockAddr::from(socket_addr))
        .with_context(|| format!("failed to bind discovery socket on {addr}"))?;
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    info!(%addr, "discovery listening");
    Ok(socket)
}

/// Receives datagrams until the socket fails; bad datagrams are skipped.
pub(crate) async fn listen(
    socket: UdpSocket,
    api: ApiContext,
    events: broadcast::Sender<DrosseEvent>,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (size, peer) = socket
            .recv_from(&mut buf)
            .await
            .context("discovery socket failed")?;

        let announcement = match parse_datagram(&buf[..size]) {
            Ok(Some(announcement)) => announcement,
            Ok(None) => continue,
            Err(err) => {
                warn!(%peer, error = %err, "dropping discovery datagram");
                continue;
            }
        };

        match resolve(&api, announcement).await {
            Ok(event) => {
                debug!(%peer, event = event.name(), uuid = %event.uuid(), "drosse announcement");
                // errs only when no front end is connected
                let _ = events.send(event);
            }
            Err(err) => warn!(%peer, error = %err, "failed to resolve drosse announcement"),
        }
    }
}

#[cfg(test)]
#[path = "tests/discover_tests.rs"]
mod tests;

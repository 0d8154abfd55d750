//! Read-only snapshot of swarm state for the diagnostic status page.

use std::fmt::Write as _;
use std::net::SocketAddr;

use crate::chunk::FileStats;
use crate::coordinator::Coordinator;
use crate::peer::ConnectionId;
use crate::transfer::{Role, TransferId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub id: TransferId,
    pub role: Role,
    /// Client id of the other endpoint.
    pub peer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub conn: ConnectionId,
    pub client_id: Option<String>,
    pub addr: SocketAddr,
    pub transfers: Vec<TransferStatus>,
    pub files: Vec<FileStats>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub tick: u64,
    pub peers: Vec<PeerStatus>,
}

impl StatusSnapshot {
    pub fn capture(coord: &Coordinator) -> Self {
        let peers = coord
            .peers()
            .iter()
            .map(|(&conn, p)| {
                let transfers = p
                    .transfers
                    .iter()
                    .map(|(id, &role)| TransferStatus {
                        id: id.clone(),
                        role,
                        peer: coord
                            .transfer(id)
                            .map(|t| match role {
                                Role::Taker => t.giver_id.clone(),
                                Role::Giver => t.taker_id.clone(),
                            })
                            .unwrap_or_default(),
                    })
                    .collect();
                PeerStatus {
                    conn,
                    client_id: p.client_id.clone(),
                    addr: p.addr,
                    transfers,
                    files: p
                        .chunks
                        .file_stats(|url| coord.file_info(url).map(|i| i.num_chunks())),
                }
            })
            .collect();
        Self {
            tick: coord.now(),
            peers,
        }
    }

    pub fn active_transfers(&self) -> usize {
        // each transfer is listed once per endpoint
        self.peers.iter().map(|p| p.transfers.len()).sum::<usize>() / 2
    }

    pub fn render_html(&self) -> String {
        let mut s = String::from("<html><head><title>Swarm Statistics</title></head><body>");
        let _ = write!(
            s,
            "Tick={} Connected Clients={} Active Transfers={}",
            self.tick,
            self.peers.len(),
            self.active_transfers()
        );
        s.push_str("<center><table border=1>");
        s.push_str("<tr><th>Client</th><th>Transfers</th><th>Files</th></tr>");
        for peer in &self.peers {
            let name = peer
                .client_id
                .as_deref()
                .map(escape)
                .unwrap_or_else(|| format!("({})", peer.conn));
            let _ = write!(s, "<tr><td>{name}<br>{}</td><td>", peer.addr);
            for t in &peer.transfers {
                let dir = match t.role {
                    Role::Taker => "DOWN",
                    Role::Giver => "UP",
                };
                let _ = write!(s, "{dir}: peer={} id={}<br>", escape(&t.peer), t.id);
            }
            s.push_str("</td><td>");
            for f in &peer.files {
                let _ = write!(
                    s,
                    "{} size={} req={} prov={} transf={}<br>",
                    escape(&f.url),
                    f.chunks,
                    f.requested,
                    f.provided,
                    f.transferring
                );
            }
            s.push_str("</td></tr>");
        }
        s.push_str("</table></center></body></html>");
        s
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

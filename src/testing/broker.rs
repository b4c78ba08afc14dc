//! Loopback MQTT v5 broker stand-in
//!
//! Just enough of the server side to drive the rumqttc engine over a real
//! socket: it accepts a connection, answers CONNECT with a successful CONNACK,
//! reads whole packets and can acknowledge SUBSCRIBE. Dropping a
//! [`BrokerConnection`] closes the socket, which the client sees as a lost
//! connection.

use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// First byte of a CONNECT packet
pub const CONNECT: u8 = 0x10;
/// First byte of a SUBSCRIBE packet (reserved flags 0b0010)
pub const SUBSCRIBE: u8 = 0x82;
/// First byte of a DISCONNECT packet
pub const DISCONNECT: u8 = 0xE0;

/// CONNACK: no session present, reason Success, no properties
const CONNACK: [u8; 5] = [0x20, 0x03, 0x00, 0x00, 0x00];
const SUBACK: u8 = 0x90;

/// Listener bound to an ephemeral loopback port
pub struct LoopbackBroker {
    listener: TcpListener,
    port: u16,
}

impl LoopbackBroker {
    pub async fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    /// Broker URL clients should connect to
    pub fn url(&self) -> String {
        format!("mqtt://127.0.0.1:{}", self.port)
    }

    /// Accept one client and complete its handshake
    pub async fn accept(&self) -> io::Result<BrokerConnection> {
        let (stream, _) = self.listener.accept().await?;
        let mut connection = BrokerConnection { stream };

        let (header, _) = connection.read_packet().await?;
        if header != CONNECT {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected CONNECT, got packet 0x{header:02x}"),
            ));
        }
        connection.stream.write_all(&CONNACK).await?;
        Ok(connection)
    }
}

/// Server side of one accepted client connection
pub struct BrokerConnection {
    stream: TcpStream,
}

impl BrokerConnection {
    /// Read one packet, returning its first byte and body
    pub async fn read_packet(&mut self) -> io::Result<(u8, Vec<u8>)> {
        let header = self.stream.read_u8().await?;
        let length = self.read_remaining_length().await?;
        let mut body = vec![0; length];
        self.stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// Skip packets until one with `header` arrives and return its body
    pub async fn wait_for(&mut self, header: u8) -> io::Result<Vec<u8>> {
        loop {
            let (received, body) = self.read_packet().await?;
            if received == header {
                return Ok(body);
            }
        }
    }

    /// Grant every filter of a SUBSCRIBE at QoS 0
    pub async fn acknowledge_subscribe(
        &mut self,
        subscribe_body: &[u8],
        filters: usize,
    ) -> io::Result<()> {
        let packet_id = subscribe_body.get(..2).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "SUBSCRIBE without packet id")
        })?;
        let remaining = u8::try_from(3 + filters)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many filters"))?;

        let mut packet = vec![SUBACK, remaining];
        packet.extend_from_slice(packet_id);
        // Empty property block, then one reason code per filter
        packet.push(0x00);
        packet.extend(std::iter::repeat(0x00).take(filters));
        self.stream.write_all(&packet).await
    }

    async fn read_remaining_length(&mut self) -> io::Result<usize> {
        let mut length = 0usize;
        for shift in [0, 7, 14, 21] {
            let byte = self.stream.read_u8().await?;
            length |= usize::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(length);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "malformed remaining length",
        ))
    }
}

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn read_request_body(socket: &mut TcpStream) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let read = socket
            .read(&mut chunk)
            .await
            .expect("request should be readable");
        if read == 0 {
            return buffer;
        }
        buffer.extend_from_slice(&chunk[..read]);

        if let Some(header_end) = find_header_end(&buffer) {
            let headers = String::from_utf8_lossy(&buffer[..header_end]).to_ascii_lowercase();
            let content_length = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body_start = header_end + 4;
            if buffer.len() >= body_start + content_length {
                return buffer[body_start..body_start + content_length].to_vec();
            }
        }
    }
}

/// Loopback HTTP/1.1 server answering `connections` requests one at a time.
/// The handle resolves to the request bodies in arrival order.
pub(crate) async fn serve_http<F>(connections: usize, respond: F) -> (String, JoinHandle<Vec<Vec<u8>>>)
where
    F: Fn(&[u8]) -> (&'static str, String) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("loopback listener should bind");
    let address = listener
        .local_addr()
        .expect("listener should have an address");

    let handle = tokio::spawn(async move {
        let mut bodies = Vec::with_capacity(connections);
        for _ in 0..connections {
            let (mut socket, _) = listener.accept().await.expect("client should connect");
            let body = read_request_body(&mut socket).await;
            let (status_line, response_body) = respond(&body);
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{response_body}",
                response_body.len()
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("response should be writable");
            let _ = socket.shutdown().await;
            bodies.push(body);
        }
        bodies
    });

    (format!("http://{address}/info"), handle)
}

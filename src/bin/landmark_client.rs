//! Test client: sends one random landmark vector and prints the prediction.
//!
//! Usage: landmark_client [host:port]

use anyhow::{Context, Result};
use rand::Rng;
use tokio::net::TcpStream;

use sign_gesture::landmarks::VECTOR_LEN;
use sign_gesture::protocol::{self, Envelope, LandmarkRequest, ServerEvent};

#[tokio::main]
async fn main() -> Result<()> {
    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:5000".to_string());

    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;
    stream.set_nodelay(true)?;
    println!("Connected to {}", addr);
    let mut framed = protocol::message_stream(stream);

    let mut rng = rand::rng();
    let vector: Vec<f32> = (0..VECTOR_LEN).map(|_| rng.random::<f32>() - 0.5).collect();
    let request = LandmarkRequest {
        vector: Some(vector),
        normalized: false,
    };
    protocol::send_message(&mut framed, &Envelope::landmark(&request)?).await?;

    let ServerEvent::Prediction(result) = protocol::recv_message::<ServerEvent>(&mut framed).await?;
    println!("Prediction: {}", serde_json::to_string(&result)?);

    Ok(())
}

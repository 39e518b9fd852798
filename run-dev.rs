use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::fs;
use std::error::Error;

// Function to check if the server is ready
fn check_server_ready(base_url: &str, timeout_secs: u64) -> Result<(), Box<dyn Error>> {
    let start_time = Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let client = reqwest::blocking::Client::new();

    // The agent reads its description from here, so it doubles as the health check
    let health_endpoint = format!("{}/openapi.json", base_url.trim_end_matches('/'));

    println!("Checking API health at: {}", health_endpoint);

    while start_time.elapsed() < timeout {
        match client.get(&health_endpoint).send() {
            Ok(response) => {
                if response.status().is_success() {
                    return Ok(());
                }
                println!("Server not ready yet, status: {}", response.status());
            },
            Err(e) => {
                println!("Server not ready yet: {}", e);
            }
        }

        thread::sleep(Duration::from_millis(500));
    }

    Err("Server did not become ready within the timeout period".into())
}

fn main() -> io::Result<()> {
    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    let mut test_framework = "pytest";
    let mut base_url = "http://localhost:8000";
    let mut llm_url = "http://localhost:11434";
    let mut model = "llama3";

    // Process command-line args
    for i in 1..args.len() {
        if i + 1 >= args.len() {
            break;
        }
        match args[i].as_str() {
            "--framework" => test_framework = &args[i + 1],
            "--base-url" => base_url = &args[i + 1],
            "--llm-url" => llm_url = &args[i + 1],
            "--model" => model = &args[i + 1],
            _ => {}
        }
    }

    // Print banner
    println!("=================================================================");
    println!("🚀 Swagger Test Agent - Development Environment");
    println!("=================================================================");

    // Start the sample API in the background
    println!("📡 Starting the sample API server...");
    let server_dir = "demos/sample_api";

    // Check if server directory exists
    if !Path::new(server_dir).exists() {
        eprintln!("❌ Sample API directory not found: {}", server_dir);
        return Ok(());
    }

    // Extract port from base_url for the API server
    let port = base_url.split(':').last().unwrap_or("8000");
    let port = port.split('/').next().unwrap_or("8000");

    let mut api_server = Command::new("cargo")
        .args(["run", "--quiet", "--", "--port", port])
        .current_dir(server_dir)
        .stdout(Stdio::piped())
        .spawn()?;

    // Wait for the server to start and validate it's responding
    println!("⏳ Waiting for the server to start and become ready...");
    if let Err(e) = check_server_ready(base_url, 60) {
        eprintln!("❌ Server did not start properly: {}", e);
        api_server.kill()?;
        return Ok(());
    }
    println!("✅ Server started and ready at {}", base_url);

    // Create the output directory if it doesn't exist
    let output_dir = PathBuf::from("output");
    if output_dir.exists() {
        println!("🧹 Cleaning up previous output directory...");
        fs::remove_dir_all(&output_dir)?;
    }
    fs::create_dir_all(&output_dir)?;

    let target_file = match test_framework {
        "jest" => output_dir.join("api.test.js"),
        _ => output_dir.join("test_api.py"),
    };
    let history_file = output_dir.join("history.json");

    // Generate, run and repair the tests against the live API
    println!("\n🤖 Running the repair cycle with '{}' via {} ({})...", test_framework, llm_url, model);
    let agent = Command::new("cargo")
        .args([
            "run",
            "--quiet",
            "--bin", "swagger-test-agent",
            "--",
            "--base-url", base_url,
            "--llm-url", llm_url,
            "--model", model,
            "-f", test_framework,
            "--feedback",
        ])
        .arg("--target-file")
        .arg(&target_file)
        .arg("--history-out")
        .arg(&history_file)
        .output()?;

    io::stdout().write_all(&agent.stdout)?;
    io::stderr().write_all(&agent.stderr)?;

    if agent.status.success() {
        println!("✅ Generated suite passed: {}", target_file.display());
    } else {
        println!("❌ No passing suite within the attempt budget");
    }
    if history_file.exists() {
        println!("📄 Attempt history written to {}", history_file.display());
    }

    // Clean up
    println!("\n🧹 Cleaning up...");
    api_server.kill()?;
    api_server.wait()?;

    println!("\n=================================================================");
    println!("🏁 Development session completed");
    println!("=================================================================");

    Ok(())
}

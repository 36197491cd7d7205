use anyhow::{Context, Result};
use common::features::FeatureSet;
use common::schema::FieldKind;
use common::{BenchmarkConfig, InfoResponse, Operation, Profile, ResponsePayload, ScenarioConfig, Statistics};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use sysinfo::{ProcessRefreshKind, RefreshKind, System};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BenchmarkResult {
    scenario_name: String,
    operation: Operation,
    concurrency: usize,
    num_requests: usize,
    latency_ms: Statistics,
    throughput_qps: f64,
    total_duration_sec: f64,
    cpu_percent: f32,
    memory_rss_mb: f64,
    errors: usize,
    error_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FullBenchmarkResult {
    framework: String,
    profile: Profile,
    server_info: InfoResponse,
    results: HashMap<String, BenchmarkResult>,
    timestamp: String,
}

/// Deterministic request body `i` for a feature set.
///
/// Numeric inputs are scaled around the probe request; text and integer
/// fields keep their probe values so categorical encoders never see an
/// unfitted category.
fn request_body(features: FeatureSet, i: usize) -> Value {
    let mut body = features.dummy_request();
    let factor = 0.5 + (i % 11) as f64 / 10.0;
    if let Some(fields) = body.as_object_mut() {
        for spec in features.schema() {
            if spec.kind != FieldKind::Float {
                continue;
            }
            if let Some(value) = fields.get_mut(spec.name) {
                if let Some(x) = value.as_f64() {
                    *value = Value::from(x * factor);
                }
            }
        }
    }
    body
}

fn progress_bar(len: usize, template: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(template)?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

struct BenchmarkClient {
    framework: String,
    server_url: String,
    client: reqwest::blocking::Client,
}

impl BenchmarkClient {
    fn new(framework: String, server_url: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            framework,
            server_url,
            client,
        })
    }

    fn wait_for_server(&self, timeout_secs: u64) -> Result<()> {
        let health_url = format!("{}/health", self.server_url);
        let start = Instant::now();

        println!("Waiting for server at {}...", self.server_url);

        while start.elapsed().as_secs() < timeout_secs {
            if let Ok(response) = self.client.get(&health_url).send() {
                if response.status().is_success() {
                    println!("✓ Server is ready!");
                    return Ok(());
                }
            }
            std::thread::sleep(Duration::from_secs(2));
        }

        anyhow::bail!("✗ Server failed to start within {}s", timeout_secs)
    }

    fn get_server_info(&self) -> Result<InfoResponse> {
        let response = self
            .client
            .get(format!("{}/info", self.server_url))
            .send()
            .context("Failed to get server info")?;

        let info: InfoResponse = response.json()?;
        Ok(info)
    }

    fn call(&self, operation: Operation, body: &Value) -> Result<ResponsePayload> {
        let response = self
            .client
            .post(format!("{}/{}", self.server_url, operation))
            .json(body)
            .send()
            .with_context(|| format!("Failed to send {} request", operation))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().unwrap_or_default();
            anyhow::bail!("Server returned error: {} {}", status, detail);
        }

        Ok(response.json()?)
    }

    fn warmup(&self, profile: Profile, num_iterations: usize) -> Result<()> {
        println!("\nWarming up server ({} iterations)...", num_iterations);

        let pb = progress_bar(num_iterations, "{msg} [{bar:40.cyan/blue}] {pos}/{len}")?;
        pb.set_message("Warmup");

        let mut errors = 0;
        for i in 0..num_iterations {
            // alternate so both models are touched
            let operation = Operation::ALL[i % 2];
            let body = profile.features(operation).dummy_request();
            if self.call(operation, &body).is_err() {
                errors += 1;
            }
            pb.inc(1);
        }

        pb.finish_with_message("✓ Warmup complete");

        if errors > 0 {
            println!(
                "⚠ Warning: {}/{} warmup requests failed",
                errors, num_iterations
            );
        }

        Ok(())
    }

    fn run_scenario(&self, profile: Profile, scenario: &ScenarioConfig) -> Result<BenchmarkResult> {
        println!("\n{}", "=".repeat(70));
        println!("Scenario: {}", scenario.name);
        println!("  Operation: {}", scenario.operation);
        println!("  Concurrency: {}", scenario.concurrency);
        println!("  Requests: {}", scenario.num_requests);
        println!("{}", "=".repeat(70));

        let features = profile.features(scenario.operation);
        let samples: Vec<Value> = (0..scenario.num_requests)
            .map(|i| request_body(features, i))
            .collect();

        let pb = progress_bar(
            scenario.num_requests,
            "{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )?;
        pb.set_message("Running");

        let start_time = Instant::now();

        // Use rayon to run requests in parallel
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(scenario.concurrency.max(1))
            .build()?;

        let outcomes: Vec<Option<f64>> = pool.install(|| {
            samples
                .par_iter()
                .map(|body| {
                    let request_start = Instant::now();
                    let outcome = self
                        .call(scenario.operation, body)
                        .ok()
                        .map(|_| request_start.elapsed().as_secs_f64() * 1000.0);
                    pb.inc(1);
                    outcome
                })
                .collect()
        });

        let total_duration = start_time.elapsed().as_secs_f64();
        pb.finish_with_message("✓ Complete");

        // Calculate statistics
        let latencies: Vec<f64> = outcomes.iter().flatten().copied().collect();
        let latency_stats = Statistics::from_samples(&latencies);

        let error_count = outcomes.len() - latencies.len();
        let throughput = latencies.len() as f64 / total_duration;
        let error_rate = if scenario.num_requests == 0 {
            0.0
        } else {
            error_count as f64 / scenario.num_requests as f64
        };

        // Get system metrics
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::everything()),
        );
        sys.refresh_all();

        let (cpu_percent, memory_rss_mb) = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| sys.process(pid))
            .map(|p| (p.cpu_usage(), p.memory() as f64 / 1024.0 / 1024.0))
            .unwrap_or((0.0, 0.0));

        let result = BenchmarkResult {
            scenario_name: scenario.name.clone(),
            operation: scenario.operation,
            concurrency: scenario.concurrency,
            num_requests: scenario.num_requests,
            latency_ms: latency_stats,
            throughput_qps: throughput,
            total_duration_sec: total_duration,
            cpu_percent,
            memory_rss_mb,
            errors: error_count,
            error_rate,
        };

        // Print results
        println!("\nResults:");
        println!("  Total duration: {:.2}s", result.total_duration_sec);
        println!("  Throughput: {:.2} req/s", result.throughput_qps);
        println!("  Latency: {}", result.latency_ms);
        println!("  Errors: {}", result.errors);
        println!("  Error rate: {:.2}%", result.error_rate * 100.0);

        Ok(result)
    }

    fn run_benchmark(&self, config: &BenchmarkConfig) -> Result<FullBenchmarkResult> {
        let server_info = self.get_server_info()?;
        println!("\nServer Info:");
        println!("{}", serde_json::to_string_pretty(&server_info)?);
        let profile = server_info.profile;

        if config.warmup.enabled {
            self.warmup(profile, config.warmup.num_requests)?;
        }

        let mut results = HashMap::new();
        for scenario in &config.scenarios {
            let result = self.run_scenario(profile, scenario)?;
            results.insert(scenario.name.clone(), result);
        }

        Ok(FullBenchmarkResult {
            framework: self.framework.clone(),
            profile,
            server_info,
            results,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }
}

fn main() -> Result<()> {
    println!("========================================================================");
    println!("Study Score Benchmark Client");
    println!("========================================================================");

    // Get environment variables
    let framework = env::var("FRAMEWORK").unwrap_or_else(|_| "onnx-rust".to_string());
    let server_url = env::var("SERVER_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
    let config_path =
        env::var("BENCHMARK_CONFIG").unwrap_or_else(|_| "/config/benchmark.yaml".to_string());
    let results_dir = env::var("RESULTS_DIR").unwrap_or_else(|_| "/results".to_string());

    println!("Framework: {}", framework);
    println!("Server URL: {}", server_url);

    let config = BenchmarkConfig::load(&config_path)
        .with_context(|| format!("Failed to load benchmark configuration {}", config_path))?;

    let client = BenchmarkClient::new(framework.clone(), server_url)?;
    client.wait_for_server(120)?;

    let results = client.run_benchmark(&config)?;

    // Save results
    let output_dir = Path::new(&results_dir).join(results.profile.as_str());
    fs::create_dir_all(&output_dir)?;

    let output_path = output_dir.join(format!("{}.json", framework));
    let json = serde_json::to_string_pretty(&results)?;
    fs::write(&output_path, json)?;

    println!("\n========================================================================");
    println!("Benchmark complete!");
    println!("Results saved to: {}", output_path.display());
    println!("========================================================================");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_requests_pass_validation() {
        for profile in [Profile::SingleSupport, Profile::DualSupport] {
            for operation in Operation::ALL {
                let features = profile.features(operation);
                for i in 0..20 {
                    assert!(
                        features.enrich(&request_body(features, i)).is_ok(),
                        "{profile} {operation} #{i}"
                    );
                }
            }
        }
    }

    #[test]
    fn generated_requests_vary_numeric_fields_only() {
        let features = Profile::SingleSupport.features(Operation::Predict);
        let first = request_body(features, 0);
        let later = request_body(features, 5);

        assert_eq!(first["weekly_study_hours"], 2.5);
        assert_eq!(later["weekly_study_hours"], 5.0);
        assert_eq!(first["family_support"], later["family_support"]);
        assert_eq!(first["course_code"], later["course_code"]);
    }
}

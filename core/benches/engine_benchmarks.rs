use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use orderflow::gateway::fields;
use orderflow::model::{DeliveryMethod, Destination, PaymentMethod};
use orderflow::{
  CheckoutRequest, ContextData, Engine, EngineConfig, GatewayConfig, GatewaySigner, MemoryStore, Pipeline,
  PipelineControl, PipelineError, SilentNotifier,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;
use uuid::Uuid;

const SECRET: &str = "BENCHSECRETKEY0123456789";

#[derive(Clone, Debug, Default)]
struct BenchContext {
  counter: u64,
}

fn engine() -> Engine {
  let config = EngineConfig::new(GatewayConfig::new("BENCH001", SECRET));
  let store = Arc::new(MemoryStore::new());
  match Engine::new(config, store, Arc::new(SilentNotifier)) {
    Ok(engine) => engine,
    Err(e) => panic!("bench engine: {}", e),
  }
}

fn request(payment_method: PaymentMethod) -> CheckoutRequest {
  CheckoutRequest {
    customer_id: Uuid::new_v4(),
    subtotal_cents: 150_000,
    shipping_fee_cents: 20_000,
    delivery_method: DeliveryMethod::HomeDelivery,
    destination: Destination::Address(Uuid::new_v4()),
    payment_method,
    voucher_code: None,
    voucher_previewed: false,
    client_ip: Some("198.51.100.1".to_string()),
  }
}

fn callback(signer: &GatewaySigner, order_code: &str, amount_cents: i64) -> HashMap<String, String> {
  let mut params: HashMap<String, String> = [
    (fields::MERCHANT_CODE, "BENCH001".to_string()),
    (fields::ORDER_CODE, order_code.to_string()),
    (fields::AMOUNT, amount_cents.to_string()),
    (fields::RESPONSE_CODE, "00".to_string()),
    (fields::TRANSACTION_STATUS, "00".to_string()),
    (fields::TRANSACTION_NO, "14000001".to_string()),
    (fields::ORDER_INFO, format!("Payment for order {}", order_code)),
  ]
  .into_iter()
  .map(|(k, v)| (k.to_string(), v))
  .collect();
  let canonical = GatewaySigner::canonical_query(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
  params.insert(fields::SECURE_HASH.to_string(), signer.sign(&canonical));
  params
}

fn bench_signature(c: &mut Criterion) {
  let mut group = c.benchmark_group("GatewaySignature");
  let signer = GatewaySigner::new(SECRET).unwrap();
  let params = callback(&signer, "241019ABCDEF01", 170_000);

  group.bench_function("canonical_query", |b| {
    b.iter(|| GatewaySigner::canonical_query(params.iter().map(|(k, v)| (k.as_str(), v.as_str()))))
  });
  group.bench_function("verify", |b| b.iter(|| signer.verify(&params).unwrap()));
  group.finish();
}

fn bench_checkout(c: &mut Criterion) {
  let mut group = c.benchmark_group("Checkout");
  let rt = Runtime::new().unwrap();
  let engine = Arc::new(engine());

  for method in [PaymentMethod::CashOnDelivery, PaymentMethod::Gateway] {
    group.throughput(Throughput::Elements(1));
    group.bench_with_input(BenchmarkId::from_parameter(method.as_str()), &method, |b, &method| {
      b.to_async(&rt).iter_batched(
        || request(method),
        |req| {
          let engine = engine.clone();
          async move { engine.checkout().place_order(req).await.unwrap() }
        },
        criterion::BatchSize::SmallInput,
      );
    });
  }
  group.finish();
}

fn bench_callback_replay(c: &mut Criterion) {
  let mut group = c.benchmark_group("CallbackReplay");
  let rt = Runtime::new().unwrap();
  let engine = Arc::new(engine());
  let signer = GatewaySigner::new(SECRET).unwrap();

  // gateways retry; a replay of a settled payment is the common hot path
  let params = rt.block_on(async {
    let placed = engine.checkout().place_order(request(PaymentMethod::Gateway)).await.unwrap();
    let params = callback(&signer, &placed.order.code, placed.order.total_cents());
    engine.reconciler().handle_callback(params.clone()).await.unwrap();
    params
  });

  group.throughput(Throughput::Elements(1));
  group.bench_function("duplicate", |b| {
    b.to_async(&rt).iter_batched(
      || params.clone(),
      |params| {
        let engine = engine.clone();
        async move { engine.reconciler().handle_callback(params).await.unwrap() }
      },
      criterion::BatchSize::SmallInput,
    );
  });
  group.finish();
}

fn bench_pipeline_overhead(c: &mut Criterion) {
  let mut group = c.benchmark_group("PipelineOverhead");
  let rt = Runtime::new().unwrap();

  for steps in [1usize, 6] {
    let defs: Vec<(&str, bool, Option<orderflow::pipeline::SkipCondition<BenchContext>>)> = (0..steps)
      .map(|i| (Box::leak(format!("step_{}", i).into_boxed_str()) as &'static str, false, None))
      .collect();
    let mut pipeline = Pipeline::<BenchContext, PipelineError>::new(&defs);
    for i in 0..steps {
      pipeline.on_root(&format!("step_{}", i), |ctx: ContextData<BenchContext>| {
        Box::pin(async move {
          ctx.write().counter += 1;
          Ok::<_, PipelineError>(PipelineControl::Continue)
        })
      });
    }
    let pipeline = Arc::new(pipeline);

    group.throughput(Throughput::Elements(steps as u64));
    group.bench_with_input(BenchmarkId::from_parameter(steps), &steps, |b, _| {
      b.to_async(&rt).iter_batched(
        || ContextData::new(BenchContext::default()),
        |ctx| {
          let pipeline = pipeline.clone();
          async move { pipeline.run(ctx).await.unwrap() }
        },
        criterion::BatchSize::SmallInput,
      );
    });
  }
  group.finish();
}

criterion_group!(
  benches,
  bench_signature,
  bench_checkout,
  bench_callback_replay,
  bench_pipeline_overhead
);
criterion_main!(benches);

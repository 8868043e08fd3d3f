//! End-to-end tests for the arbitrage agent.
//!
//! Everything runs against the in-memory chain from `network::mock` with the
//! tokio clock paused, so backoff and confirmation delays resolve instantly.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::assert_ok;
use url::Url;

use dex_arb_agent::error::NetworkError;
use dex_arb_agent::fee::{FeeOracle, FeeSettings, FeeSource, Urgency};
use dex_arb_agent::network::mock::{MockChain, MockConfirmation, MockConnector};
use dex_arb_agent::network::{BackoffPolicy, Endpoint, EndpointManager, EndpointSettings};
use dex_arb_agent::orchestrator::{LoopExit, LoopSettings, Orchestrator, OrchestratorState};
use dex_arb_agent::scanner::{
    NotionalSpreadPolicy, OpportunityScanner, ScanSettings, Token, TradingPair, Venue,
};
use dex_arb_agent::settlement::{
    ExecutionResult, ExecutionStatus, ExecutorSettings, MemorySink, OutcomeSink,
    SettlementExecutor, SubmissionRoute,
};

const PAIR: &str = "WETH/USDC";
const GWEI: u64 = 1_000_000_000;

fn pair() -> TradingPair {
    TradingPair::new(
        Token {
            symbol: "WETH".to_string(),
            address: Address::repeat_byte(0x11),
            decimals: 18,
        },
        Token {
            symbol: "USDC".to_string(),
            address: Address::repeat_byte(0x22),
            decimals: 6,
        },
    )
}

fn venues() -> Vec<Venue> {
    vec![
        Venue {
            name: "venue-a".to_string(),
            router: Address::repeat_byte(0xa1),
        },
        Venue {
            name: "venue-b".to_string(),
            router: Address::repeat_byte(0xa2),
        },
    ]
}

fn endpoints(count: usize) -> Vec<Endpoint> {
    (0..count)
        .map(|i| {
            let url = Url::parse(&format!("http://node-{}.local", i)).unwrap();
            Endpoint::new(format!("endpoint-{}", i), url, i)
        })
        .collect()
}

struct Agent {
    manager: Arc<EndpointManager>,
    oracle: Arc<FeeOracle>,
    scanner: Arc<OpportunityScanner>,
    executor: Arc<SettlementExecutor>,
    orchestrator: Arc<Orchestrator>,
    sink: Arc<MemorySink>,
}

fn agent(connector: MockConnector, endpoint_count: usize, route: SubmissionRoute) -> Agent {
    let manager = Arc::new(
        EndpointManager::new(
            endpoints(endpoint_count),
            Arc::new(connector),
            EndpointSettings {
                backoff: BackoffPolicy {
                    base_delay: Duration::from_secs(1),
                    max_delay: Duration::from_secs(60),
                    max_attempts: 4,
                },
                request_timeout: Duration::from_secs(2),
                health_probe_interval: Duration::from_secs(300),
            },
        )
        .unwrap(),
    );
    let oracle = Arc::new(FeeOracle::new(
        manager.clone(),
        FeeSettings {
            default_fee: U256::from(25 * GWEI),
            jitter_bps: 0,
            ..FeeSettings::default()
        },
    ));
    let scanner = Arc::new(OpportunityScanner::new(
        manager.clone(),
        oracle.clone(),
        vec![pair()],
        venues(),
        ScanSettings {
            min_spread: dec!(0.005),
            min_profit: Decimal::ZERO,
            trade_size: dec!(1),
            venue_fee_rate: dec!(0.003),
            sampling_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
        },
        Arc::new(NotionalSpreadPolicy::new(dec!(0.00000000001))),
    ));
    let state = Arc::new(OrchestratorState::new());
    let sink = Arc::new(MemorySink::new());
    let executor = Arc::new(SettlementExecutor::new(
        manager.clone(),
        oracle.clone(),
        state.flight().clone(),
        route,
        ExecutorSettings {
            confirmation_timeout: Duration::from_secs(60),
            ..ExecutorSettings::default()
        },
        vec![sink.clone() as Arc<dyn OutcomeSink>],
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        scanner.clone(),
        executor.clone(),
        manager.clone(),
        state,
        LoopSettings {
            tick_interval: Duration::from_secs(5),
            recovery_delay: Duration::from_secs(1),
            stats_every_ticks: 10,
            health_probe_interval: Duration::from_secs(300),
        },
    ));

    Agent {
        manager,
        oracle,
        scanner,
        executor,
        orchestrator,
        sink,
    }
}

fn healthy(route: SubmissionRoute) -> (MockChain, Agent) {
    let chain = MockChain::new();
    let connector = MockConnector::new();
    connector.accept("endpoint-0", chain.clone());
    (chain, agent(connector, 1, route))
}

#[tokio::test(start_paused = true)]
async fn profitable_spread_is_detected_and_settled() {
    let (chain, agent) = healthy(SubmissionRoute::Direct);
    chain.set_price(PAIR, "venue-a", dec!(100));
    chain.set_price(PAIR, "venue-b", dec!(101.5));
    chain.set_confirmation(MockConfirmation::Confirm(U256::from(21_000u64 * 36 * GWEI)));

    let opportunities = assert_ok!(agent.scanner.detect().await);
    assert_eq!(opportunities.len(), 1);
    let best = &opportunities[0];
    assert_eq!(best.venue_buy.name, "venue-a");
    assert_eq!(best.venue_sell.name, "venue-b");
    assert_eq!(best.spread_ratio, dec!(0.015));
    // 1.5 gross, 0.6 venue fees, 0.36 transaction cost at 36 gwei
    assert_eq!(best.estimated_profit, dec!(0.54));

    assert!(agent.orchestrator.start().await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.orchestrator.stop().await, Some(LoopExit::Stopped));

    let records = agent.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Success);
    assert_eq!(records[0].cost, Some((21_000u64 * 36 * GWEI).to_string()));
    assert_eq!(records[0].route, "direct:endpoint-0");

    let submitted = chain.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].venue_buy.name, "venue-a");
    assert!(submitted[0].min_output > Decimal::ZERO);

    let status = agent.orchestrator.status();
    assert_eq!(status.succeeded, 1);
    assert_eq!(status.errors, 0);
    assert!(!status.running);
}

#[tokio::test(start_paused = true)]
async fn narrow_spread_is_not_reported() {
    let (chain, agent) = healthy(SubmissionRoute::Direct);
    chain.set_price(PAIR, "venue-a", dec!(100));
    chain.set_price(PAIR, "venue-b", dec!(100.2));

    let opportunities = assert_ok!(agent.scanner.detect().await);
    assert!(opportunities.is_empty());

    agent.orchestrator.start().await;
    tokio::time::sleep(Duration::from_secs(11)).await;
    agent.orchestrator.stop().await;

    let status = agent.orchestrator.status();
    assert!(status.ticks >= 2);
    assert_eq!(status.opportunities_found, 0);
    assert_eq!(chain.submit_calls(), 0);
    assert!(agent.sink.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn refused_endpoints_end_the_run() {
    let connector = MockConnector::new();
    let agent = agent(connector.clone(), 3, SubmissionRoute::Direct);

    assert!(agent.orchestrator.start().await);
    let exit = agent.orchestrator.wait_terminal().await;
    assert_eq!(
        exit,
        LoopExit::NetworkUnavailable(NetworkError::NetworkUnavailable { attempts: 4 })
    );

    // Each round walks the whole ranked list, then backs off 1s, 2s, 4s.
    for id in ["endpoint-0", "endpoint-1", "endpoint-2"] {
        assert_eq!(connector.attempts(id), 4);
    }
    assert_eq!(
        connector.round_gaps("endpoint-0"),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
        ]
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    let status = agent.orchestrator.status();
    assert!(!status.running);
    assert!(status.terminal.is_some());
    assert!(agent.manager.is_exhausted());

    // Exhaustion is permanent, even once an endpoint would answer again.
    connector.accept("endpoint-0", MockChain::new());
    assert!(!agent.orchestrator.start().await);
    assert!(agent.manager.get_connection().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn second_opportunity_is_busy_while_first_confirms() {
    let (chain, agent) = healthy(SubmissionRoute::Direct);
    chain.set_price(PAIR, "venue-a", dec!(100));
    chain.set_price(PAIR, "venue-b", dec!(101.5));
    chain.set_confirmation_delay(Duration::from_secs(20));

    let opportunities = assert_ok!(agent.scanner.detect().await);
    let opportunity = opportunities[0].clone();

    let executor = agent.executor.clone();
    let first_opportunity = opportunity.clone();
    let first = tokio::spawn(async move { executor.execute(&first_opportunity).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(agent.executor.is_busy());
    assert_eq!(chain.confirm_calls(), 1);

    let calls_before = chain.total_calls();
    let second = assert_ok!(agent.executor.execute(&opportunity).await);
    assert_eq!(second, ExecutionResult::Busy);
    assert_eq!(chain.total_calls(), calls_before);

    let first = first.await.unwrap().unwrap();
    match first {
        ExecutionResult::Completed(outcome) => assert_eq!(outcome.status, ExecutionStatus::Success),
        other => panic!("expected a completed settlement, got {:?}", other),
    }
    assert!(!agent.executor.is_busy());
    assert_eq!(chain.submit_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_fee_query_falls_back_without_stopping_the_loop() {
    let (chain, agent) = healthy(SubmissionRoute::Direct);
    chain.set_price(PAIR, "venue-a", dec!(100));
    chain.set_price(PAIR, "venue-b", dec!(101.5));
    chain.set_fee(None);

    let quote = agent.oracle.quote(Urgency::Normal).await;
    assert_eq!(quote.source, FeeSource::Fallback);
    assert_eq!(quote.amount, U256::from(25 * GWEI));

    agent.orchestrator.start().await;
    tokio::time::sleep(Duration::from_secs(11)).await;
    agent.orchestrator.stop().await;

    let status = agent.orchestrator.status();
    assert!(status.ticks >= 2);
    assert_eq!(status.errors, 0);
    assert!(status.succeeded >= 1);
    assert!(chain.fee_calls() >= 2);

    let submitted = chain.submitted();
    // Fallback base fee at high urgency
    assert_eq!(submitted[0].max_fee, U256::from(30 * GWEI));
}

#[tokio::test(start_paused = true)]
async fn protected_route_bypasses_the_endpoint() {
    let relay = MockChain::new().labelled("relay");
    let (chain, agent) = healthy(SubmissionRoute::Protected(Arc::new(relay.clone())));
    chain.set_price(PAIR, "venue-a", dec!(100));
    chain.set_price(PAIR, "venue-b", dec!(101.5));

    let opportunities = assert_ok!(agent.scanner.detect().await);
    let result = assert_ok!(agent.executor.execute(&opportunities[0]).await);

    let ExecutionResult::Completed(outcome) = result else {
        panic!("expected a completed settlement, got {:?}", result);
    };
    assert_eq!(outcome.status, ExecutionStatus::Success);
    assert_eq!(outcome.route, "relay");
    assert_eq!(relay.submit_calls(), 1);
    assert_eq!(chain.submit_calls(), 0);
}

// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Contract bindings for the commit-reveal dice contract.
//!
//! `BetPlaced` is emitted when a player commits a bet; `BetSettled` when any
//! settler calls `settleBet` after the reveal block. `amount` on the settled
//! event is the reward paid out (zero on a loss); the stake lives on the
//! originating `BetPlaced`.

use ethers::prelude::abigen;

abigen!(
    DiceBet,
    r#"[
        event BetPlaced(uint32 indexed roomId, address indexed player, uint256 amount, bool betBig, uint256 commitBlock, uint256 revealBlock)
        event BetSettled(uint32 indexed roomId, address indexed player, uint256 amount, bool won, uint8 hashValue, bytes32 blockHash, uint256 betId)
        function settleBet(uint32 roomId, address player)
        function revealDelay() external view returns (uint256)
        function playerBets(uint32 roomId, address player) external view returns (uint256 amount, bool betBig, uint256 commitBlock, bool settled)
    ]"#
);

//! Subnet pools: a constant-product bonding curve between tao and the
//! subnet's alpha token. The root pool converts 1:1 and keeps `k = 0`.

pub type PoolId = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    pub id: PoolId,
    pub is_root: bool,
    /// Tao held in the pool reserve
    pub tao_in: f64,
    /// Alpha held in the pool reserve
    pub alpha_in: f64,
    /// Alpha outstanding (staked outside the reserve)
    pub alpha_out: f64,
    /// Constant product `tao_in * alpha_in`, zero for the root pool
    pub k: f64,
}

impl Pool {
    pub fn new(id: PoolId, tao_in: f64, alpha_in: f64, alpha_out: f64) -> Self {
        Self {
            id,
            is_root: false,
            tao_in,
            alpha_in,
            alpha_out,
            k: tao_in * alpha_in,
        }
    }

    pub fn root(id: PoolId, tao_in: f64, alpha_in: f64, alpha_out: f64) -> Self {
        Self {
            id,
            is_root: true,
            tao_in,
            alpha_in,
            alpha_out,
            k: 0.0,
        }
    }

    /// Alpha price in tao.
    pub fn price(&self) -> f64 {
        if self.is_root || self.alpha_in == 0.0 {
            1.0
        } else {
            self.tao_in / self.alpha_in
        }
    }

    /// Dividend weight of an alpha stake, valued against the tao reserve.
    /// Root stakes weigh their raw amount; the caller scales by root weight.
    pub fn weight(&self, alpha_amount: f64) -> f64 {
        if self.is_root {
            alpha_amount
        } else if self.alpha_out == 0.0 {
            0.0
        } else {
            (alpha_amount / self.alpha_out) * self.tao_in
        }
    }

    /// True when the curve can quote a trade without dividing by zero.
    pub fn can_trade(&self) -> bool {
        self.is_root || (self.tao_in > 0.0 && self.alpha_in > 0.0 && self.k > 0.0)
    }

    /// Swap tao into the pool, returning the alpha bought. `k` is preserved.
    pub fn stake(&mut self, tao_amount: f64) -> f64 {
        if self.is_root {
            self.alpha_out += tao_amount;
            return tao_amount;
        }
        let new_tao_in = self.tao_in + tao_amount;
        let new_alpha_in = self.k / new_tao_in;
        let alpha_bought = self.alpha_in - new_alpha_in;
        self.alpha_out += alpha_bought;
        self.alpha_in = new_alpha_in;
        self.tao_in = new_tao_in;
        alpha_bought
    }

    /// Swap alpha back into the pool, returning the tao received. `k` is preserved.
    pub fn unstake(&mut self, alpha_amount: f64) -> f64 {
        if self.is_root {
            self.alpha_out -= alpha_amount;
            return alpha_amount;
        }
        let new_alpha_in = self.alpha_in + alpha_amount;
        let new_tao_in = self.k / new_alpha_in;
        let tao_bought = self.tao_in - new_tao_in;
        self.alpha_out -= alpha_amount;
        self.alpha_in = new_alpha_in;
        self.tao_in = new_tao_in;
        tao_bought
    }

    /// Add emission-derived liquidity outside the curve and redefine `k`.
    pub fn inject(&mut self, tao_amount: f64, alpha_amount: f64, alpha_out_delta: f64) {
        self.tao_in += tao_amount;
        self.alpha_in += alpha_amount;
        self.alpha_out += alpha_out_delta;
        self.k = if self.is_root {
            0.0
        } else {
            self.tao_in * self.alpha_in
        };
    }

    /// Tao an alpha position would yield if sold at current reserves.
    pub fn unstake_quote(&self, alpha_amount: f64) -> f64 {
        if self.is_root {
            return alpha_amount;
        }
        self.tao_in - self.k / (self.alpha_in + alpha_amount)
    }
}

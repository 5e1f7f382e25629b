//! PTX source for the CUDA provider's forward kernels. Trimmed from the
//! teacher's kernel set down to the ops this provider actually claims via
//! `supports` — training-only backward kernels are a non-goal here.

pub const ELEMENTWISE_KERNELS: &str = r#"
extern "C" __global__ void relu_kernel(float* out, const float* in, int n) {
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        out[i] = fmaxf(0.0f, in[i]);
    }
}

extern "C" __global__ void sigmoid_kernel(float* out, const float* in, int n) {
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        out[i] = 1.0f / (1.0f + expf(-in[i]));
    }
}

extern "C" __global__ void add_kernel(float* out, const float* a, const float* b, int n) {
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        out[i] = a[i] + b[i];
    }
}

extern "C" __global__ void conv2d_kernel(
    float* out, const float* in, const float* weight,
    int n, int ci, int h, int w,
    int co, int kh, int kw,
    int oh, int ow,
    int stride, int padding
) {
    int idx = blockIdx.x * blockDim.x + threadIdx.x;
    int total = n * co * oh * ow;
    if (idx < total) {
        int ni = idx / (co * oh * ow);
        int coi = (idx / (oh * ow)) % co;
        int hi = (idx / ow) % oh;
        int wi = idx % ow;

        float sum = 0.0f;
        for (int cii = 0; cii < ci; ++cii) {
            for (int k_hi = 0; k_hi < kh; ++k_hi) {
                for (int k_wi = 0; k_wi < kw; ++k_wi) {
                    int in_h = hi * stride + k_hi - padding;
                    int in_w = wi * stride + k_wi - padding;
                    if (in_h >= 0 && in_h < h && in_w >= 0 && in_w < w) {
                        sum += in[ni * (ci * h * w) + cii * (h * w) + in_h * w + in_w] *
                               weight[coi * (ci * kh * kw) + cii * (kh * kw) + k_hi * kw + k_wi];
                    }
                }
            }
        }
        out[idx] = sum;
    }
}

extern "C" __global__ void max_pool2d_kernel(
    float* out, const float* in,
    int n, int c, int h, int w,
    int oh, int ow,
    int kh, int kw,
    int stride
) {
    int idx = blockIdx.x * blockDim.x + threadIdx.x;
    int total = n * c * oh * ow;
    if (idx < total) {
        int ni = idx / (c * oh * ow);
        int ci = (idx / (oh * ow)) % c;
        int hi = (idx / ow) % oh;
        int wi = idx % ow;

        float max_val = -1e38f;
        for (int kh_i = 0; kh_i < kh; ++kh_i) {
            for (int kw_i = 0; kw_i < kw; ++kw_i) {
                int in_h = hi * stride + kh_i;
                int in_w = wi * stride + kw_i;
                if (in_h < h && in_w < w) {
                    float val = in[ni * (c * h * w) + ci * (h * w) + in_h * w + in_w];
                    if (val > max_val) max_val = val;
                }
            }
        }
        out[idx] = max_val;
    }
}
"#;
